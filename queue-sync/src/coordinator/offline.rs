use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Encoded ACTION messages a client produced before its host channel opened.
///
/// Bounded: once `capacity` payloads wait, further pushes are refused rather
/// than evicting older ones, so replay never skips an action.
#[derive(Debug)]
pub struct OfflineQueue {
    pending: VecDeque<(Instant, Vec<u8>)>,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Hold `payload` for replay. False when the queue is at capacity.
    pub fn push(&mut self, payload: Vec<u8>) -> bool {
        if self.is_full() {
            return false;
        }
        self.pending.push_back((Instant::now(), payload));
        true
    }

    /// Remove every payload in submission order.
    pub fn take_all(&mut self) -> Vec<Vec<u8>> {
        if let Some(age) = self.oldest_age() {
            log::debug!("Replaying {} queued actions (oldest waited {age:?})", self.len());
        }
        self.pending.drain(..).map(|(_, payload)| payload).collect()
    }

    /// How long the oldest payload has been waiting.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.pending.front().map(|(queued_at, _)| queued_at.elapsed())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("Discarding {} queued actions", self.pending.len());
        }
        self.pending.clear();
    }

    /// Bytes held across all payloads.
    pub fn total_bytes(&self) -> usize {
        self.pending.iter().map(|(_, payload)| payload.len()).sum()
    }
}
