//! Thread-safe audio queue with priority and reservation support.
//!
//! Items are processed in priority order (HIGH > NORMAL > LOW), and within
//! the same priority, in FIFO order based on reservation time. Reservation
//! support lets a caller freeze a queue slot before audio exists, so FIFO
//! ordering survives variable-length TTS synthesis across windows.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::FillError;

/// Average bytes per second of 24kHz 16-bit mono PCM, used for wait estimates.
pub const BYTES_PER_SECOND: u64 = 48_000;

/// How long a reserved slot may sit unfilled before it is dropped.
pub const RESERVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Audio queue priority levels. Lower numeric value plays first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl Priority {
    /// Parse the HTTP-facing priority string. Unknown values coerce to
    /// `Normal`, matching the source's `priority_map.get(..., Priority.NORMAL)`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

/// An item's audio payload. `Pending` carries no bytes by construction,
/// so `fill` is a total function rather than an `Option` mutation.
#[derive(Debug, Clone)]
pub enum ItemAudio {
    Pending,
    Ready { pcm: Arc<[u8]>, sample_rate: u32 },
}

impl ItemAudio {
    pub fn is_ready(&self) -> bool {
        matches!(self, ItemAudio::Ready { .. })
    }
}

/// An item in the audio queue.
#[derive(Debug, Clone)]
pub struct Item {
    pub item_id: String,
    pub priority: Priority,
    pub reservation_time: Instant,
    /// Tiebreaker for items reserved in the same instant; assigned in
    /// strictly increasing order, so ordering is a strict weak order.
    pub sequence: u64,
    pub project: String,
    pub audio: ItemAudio,
}

impl Item {
    fn order_key(&self) -> (Priority, Instant, u64) {
        (self.priority, self.reservation_time, self.sequence)
    }

    fn is_ready(&self) -> bool {
        self.audio.is_ready()
    }

    fn ready_len_bytes(&self) -> Option<usize> {
        match &self.audio {
            ItemAudio::Ready { pcm, .. } => Some(pcm.len()),
            ItemAudio::Pending => None,
        }
    }
}

/// Outcome of a single `dequeue` attempt.
pub enum Dequeued {
    /// An item is ready to play.
    Item(Item),
    /// No item was ready within `wait`; the caller should try again.
    Empty,
    /// The given reservation aged out and was dropped without ever being
    /// filled. The caller (the playback worker) is responsible for firing
    /// that item's completion event before retrying dequeue.
    Expired(String),
}

struct Locked {
    items: Vec<Item>,
    next_sequence: u64,
    total_enqueued: u64,
    total_played: u64,
}

impl Locked {
    /// Index of the item with the smallest order key, i.e. next to play.
    fn index_of_head(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .min_by_key(|(_, item)| item.order_key())
            .map(|(idx, _)| idx)
    }

    /// 1-indexed rank of `key` among current items (counting itself).
    fn rank_of(&self, key: (Priority, Instant, u64)) -> usize {
        self.items.iter().filter(|i| i.order_key() < key).count() + 1
    }

    /// Sum of ready audio ahead of the newest reservation, converted to ms.
    fn estimated_wait_ms(&self) -> u64 {
        let Some(newest) = self.items.iter().map(|i| i.sequence).max() else {
            return 0;
        };
        let total_bytes: usize = self
            .items
            .iter()
            .filter(|i| i.sequence != newest)
            .filter_map(|i| i.ready_len_bytes())
            .sum();
        (total_bytes as u64 * 1000) / BYTES_PER_SECOND
    }
}

/// Thread-safe priority+reservation queue. Cloning shares the same state.
#[derive(Clone)]
pub struct AudioQueue {
    state: Arc<(Mutex<Locked>, Condvar)>,
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new((
                Mutex::new(Locked {
                    items: Vec::new(),
                    next_sequence: 0,
                    total_enqueued: 0,
                    total_played: 0,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Reserve a slot before audio exists. Returns the item id and its
    /// 1-indexed rank in the current ordering.
    pub fn reserve(&self, project: &str, priority: Priority) -> (String, usize) {
        let (mutex, condvar) = &*self.state;
        let mut locked = mutex.lock().unwrap();

        let item_id = uuid::Uuid::new_v4().to_string();
        let sequence = locked.next_sequence;
        locked.next_sequence += 1;

        let item = Item {
            item_id: item_id.clone(),
            priority,
            reservation_time: Instant::now(),
            sequence,
            project: project.to_string(),
            audio: ItemAudio::Pending,
        };
        let key = item.order_key();
        locked.items.push(item);
        locked.total_enqueued += 1;
        let position = locked.rank_of(key);
        let _ = condvar; // nothing to wake yet: the item is still pending

        (item_id, position)
    }

    /// Attach audio to a previously reserved slot, transitioning it from
    /// pending to ready. Wakes any worker blocked in `dequeue`.
    pub fn fill(&self, item_id: &str, pcm: Arc<[u8]>, sample_rate: u32) -> Result<(), FillError> {
        let (mutex, condvar) = &*self.state;
        let mut locked = mutex.lock().unwrap();

        let item = locked
            .items
            .iter_mut()
            .find(|i| i.item_id == item_id)
            .ok_or(FillError::NotFound)?;
        item.audio = ItemAudio::Ready { pcm, sample_rate };

        condvar.notify_all();
        Ok(())
    }

    /// Reserve and fill in one call. Returns (item_id, position, estimated_wait_ms).
    pub fn enqueue(
        &self,
        pcm: Arc<[u8]>,
        sample_rate: u32,
        project: &str,
        priority: Priority,
    ) -> (String, usize, u64) {
        let (mutex, condvar) = &*self.state;
        let mut locked = mutex.lock().unwrap();

        let item_id = uuid::Uuid::new_v4().to_string();
        let sequence = locked.next_sequence;
        locked.next_sequence += 1;

        let item = Item {
            item_id: item_id.clone(),
            priority,
            reservation_time: Instant::now(),
            sequence,
            project: project.to_string(),
            audio: ItemAudio::Ready { pcm, sample_rate },
        };
        let key = item.order_key();
        locked.items.push(item);
        locked.total_enqueued += 1;
        let position = locked.rank_of(key);
        let wait_ms = locked.estimated_wait_ms();

        condvar.notify_all();
        (item_id, position, wait_ms)
    }

    /// Remove and return the next ready item, waiting up to `wait` if the
    /// head of the queue is pending and hasn't timed out yet.
    pub fn dequeue(&self, wait: Duration) -> Dequeued {
        let (mutex, condvar) = &*self.state;
        let mut locked = mutex.lock().unwrap();

        let Some(idx) = locked.index_of_head() else {
            return Dequeued::Empty;
        };

        if locked.items[idx].is_ready() {
            let item = locked.items.remove(idx);
            locked.total_played += 1;
            return Dequeued::Item(item);
        }

        let age = locked.items[idx].reservation_time.elapsed();
        if age > RESERVATION_TIMEOUT {
            let expired = locked.items.remove(idx);
            return Dequeued::Expired(expired.item_id);
        }

        let head_id = locked.items[idx].item_id.clone();
        let (mut locked2, _timeout) = condvar.wait_timeout(locked, wait).unwrap();
        if let Some(pos) = locked2.items.iter().position(|i| i.item_id == head_id) {
            if locked2.items[pos].is_ready() {
                let item = locked2.items.remove(pos);
                locked2.total_played += 1;
                return Dequeued::Item(item);
            }
        }
        Dequeued::Empty
    }

    /// Non-destructive look at the next item to play.
    pub fn peek(&self) -> Option<Item> {
        let (mutex, _) = &*self.state;
        let locked = mutex.lock().unwrap();
        locked.index_of_head().map(|idx| locked.items[idx].clone())
    }

    /// Remove items, optionally scoped to one project. Returns the count removed.
    pub fn clear(&self, project: Option<&str>) -> usize {
        let (mutex, _) = &*self.state;
        let mut locked = mutex.lock().unwrap();
        let before = locked.items.len();
        match project {
            Some(p) => locked.items.retain(|i| i.project != p),
            None => locked.items.clear(),
        }
        before - locked.items.len()
    }

    pub fn len(&self) -> usize {
        let (mutex, _) = &*self.state;
        mutex.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any queued item (other than `except_id`) whose project
    /// differs from `project` sorts ahead of `except_id` in current order,
    /// or if fewer args are known, ahead of everything (used for reserve's
    /// should_announce check by the coordinator).
    pub fn any_other_project_ahead_of(&self, except_id: &str, project: &str) -> bool {
        let (mutex, _) = &*self.state;
        let locked = mutex.lock().unwrap();
        let Some(target) = locked.items.iter().find(|i| i.item_id == except_id) else {
            return false;
        };
        let target_key = target.order_key();
        locked
            .items
            .iter()
            .filter(|i| i.item_id != except_id)
            .any(|i| i.order_key() < target_key && i.project != project)
    }

    pub fn status(&self) -> QueueStatus {
        let (mutex, _) = &*self.state;
        let locked = mutex.lock().unwrap();
        let pending_reservations = locked.items.iter().filter(|i| !i.is_ready()).count();
        QueueStatus {
            queue_length: locked.items.len(),
            pending_reservations,
            total_enqueued: locked.total_enqueued,
            total_played: locked.total_played,
            estimated_wait_ms: locked.estimated_wait_ms(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub pending_reservations: usize,
    pub total_enqueued: u64,
    pub total_played: u64,
    pub estimated_wait_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pcm(n: usize) -> Arc<[u8]> {
        vec![0u8; n].into()
    }

    #[test]
    fn fifo_within_same_priority() {
        let q = AudioQueue::new();
        let (a, _) = q.reserve("A", Priority::Normal);
        let (b, _) = q.reserve("B", Priority::Normal);
        q.fill(&b, pcm(10), 24000).unwrap();
        q.fill(&a, pcm(10), 24000).unwrap();

        let first = match q.dequeue(Duration::from_millis(10)) {
            Dequeued::Item(item) => item,
            _ => panic!("expected item"),
        };
        assert_eq!(first.item_id, a, "earlier reservation must play first");

        let second = match q.dequeue(Duration::from_millis(10)) {
            Dequeued::Item(item) => item,
            _ => panic!("expected item"),
        };
        assert_eq!(second.item_id, b);
    }

    #[test]
    fn high_priority_jumps_queue() {
        let q = AudioQueue::new();
        let (_normal_id, _) = q.reserve("A", Priority::Normal);
        let (high_id, _, _) = q.enqueue(pcm(10), 24000, "B", Priority::High);

        let item = match q.dequeue(Duration::from_millis(10)) {
            Dequeued::Item(item) => item,
            _ => panic!("expected the high priority item, got a different result"),
        };
        assert_eq!(item.item_id, high_id);
    }

    #[test]
    fn fill_unknown_id_is_not_found() {
        let q = AudioQueue::new();
        let err = q.fill("nonexistent", pcm(4), 24000).unwrap_err();
        assert_eq!(err, FillError::NotFound);
    }

    #[test]
    fn dequeue_waits_for_pending_head_then_returns_it() {
        let q = AudioQueue::new();
        let (a, _) = q.reserve("A", Priority::Normal);
        let q2 = q.clone();
        let a2 = a.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q2.fill(&a2, pcm(10), 24000).unwrap();
        });

        let item = match q.dequeue(Duration::from_millis(200)) {
            Dequeued::Item(item) => item,
            _ => panic!("expected the reserved item once filled"),
        };
        assert_eq!(item.item_id, a);
    }

    #[test]
    fn selective_clear_only_removes_matching_project() {
        let q = AudioQueue::new();
        q.enqueue(pcm(4), 24000, "A", Priority::Normal);
        q.enqueue(pcm(4), 24000, "B", Priority::Normal);
        q.enqueue(pcm(4), 24000, "A", Priority::Normal);

        let removed = q.clear(Some("A"));
        assert_eq!(removed, 2);
        assert_eq!(q.len(), 1);
        let remaining = q.peek().unwrap();
        assert_eq!(remaining.project, "B");
    }

    #[test]
    fn should_announce_true_when_other_project_ahead() {
        let q = AudioQueue::new();
        let (_a, _) = q.reserve("A", Priority::Normal);
        let (b, _) = q.reserve("B", Priority::Normal);
        assert!(q.any_other_project_ahead_of(&b, "B"));

        // High priority sorts ahead of every existing (normal) item, so
        // nothing can be "ahead of" this reservation regardless of project.
        let (a2, _) = q.reserve("A", Priority::High);
        assert!(!q.any_other_project_ahead_of(&a2, "A"));
    }
}
