//! Per-item completion notification.
//!
//! Every `item_id` returned to a client has a single-shot notification
//! created synchronously before the id leaves the process — this closes
//! the race where a client could call `wait(item_id)` before the item was
//! playable. Uses `dashmap` rather than a `Mutex<HashMap<_>>` so handlers
//! and the worker don't contend on one lock across `.await` points; no
//! teacher module needed a concurrent map like this (its state lives
//! behind a single `Mutex<AppState>` instead), so this is enriched from
//! `other_examples/7blacky7-speakeasy`, which reaches for `dashmap` for
//! the same reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::timeout;

/// One item's completion state. `done` is checked before and after waiting
/// on `notify` so a `signal()` that lands between a waiter's check and its
/// subscribe can't be missed (`Notify::notify_waiters` has no memory for
/// waiters that haven't subscribed yet), and so multiple concurrent
/// `wait()` callers for the same id all observe the signal.
struct Completion {
    done: AtomicBool,
    notify: Notify,
}

#[derive(Clone, Default)]
pub struct CompletionRegistry {
    events: Arc<DashMap<String, Arc<Completion>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id before it is handed to any client.
    pub fn create(&self, item_id: &str) {
        self.events.insert(
            item_id.to_string(),
            Arc::new(Completion {
                done: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        );
    }

    /// Fire the event for `item_id`. Idempotent.
    pub fn signal(&self, item_id: &str) {
        if let Some(completion) = self.events.get(item_id) {
            completion.done.store(true, Ordering::SeqCst);
            completion.notify.notify_waiters();
        }
    }

    /// Wait for `item_id` to complete, or until `timeout_after` elapses.
    ///
    /// An unknown id is treated as already completed: ids are garbage
    /// collected a bounded time after firing, so "unknown" and "long since
    /// finished" are indistinguishable, and the intended behavior is to
    /// report success rather than treat it as an error.
    pub async fn wait(&self, item_id: &str, timeout_after: Duration) -> bool {
        let Some(completion) = self.events.get(item_id).map(|c| c.clone()) else {
            return true;
        };
        if completion.done.load(Ordering::SeqCst) {
            return true;
        }

        let wait_for_signal = async {
            loop {
                let notified = completion.notify.notified();
                if completion.done.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
                if completion.done.load(Ordering::SeqCst) {
                    return;
                }
            }
        };
        timeout(timeout_after, wait_for_signal).await.is_ok()
    }

    /// Schedule removal of `item_id`'s event after `after`, bounding memory
    /// use for items no one ever waits on again.
    pub fn schedule_cleanup(&self, item_id: String, after: Duration) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            registry.events.remove(&item_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_on_unknown_id_succeeds_immediately() {
        let registry = CompletionRegistry::new();
        let completed = registry.wait("never-created", Duration::from_millis(10)).await;
        assert!(completed);
    }

    #[tokio::test]
    async fn signal_before_wait_is_not_lost() {
        let registry = CompletionRegistry::new();
        registry.create("a");
        registry.signal("a");
        let completed = registry.wait("a", Duration::from_millis(50)).await;
        assert!(completed);
    }

    #[tokio::test]
    async fn wait_times_out_when_never_signaled() {
        let registry = CompletionRegistry::new();
        registry.create("a");
        let completed = registry.wait("a", Duration::from_millis(20)).await;
        assert!(!completed);
    }
}
