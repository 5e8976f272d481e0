//! Inflight delivery tracking for QoS 1/2 publishes
//!
//! Each publish that expects an acknowledgement is recorded with a
//! deadline. A periodic sweep hands expired entries back for
//! retransmission and pushes their deadline out by one window. There is
//! no retry limit; entries leave only on acknowledgement or [`clear`].
//!
//! [`clear`]: InflightTracker::clear

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::warn;

/// Time an entry may stay unacknowledged before it is resent
pub const ACK_WINDOW: Duration = Duration::from_millis(1200);

/// Initial capacity once the tracker first grows
const MIN_CAPACITY: usize = 8;

/// An unacknowledged publish
#[derive(Debug, Clone)]
pub struct InflightMessage {
    /// Topic the message was published to
    pub topic: Arc<str>,
    /// Message payload
    pub payload: Bytes,
    /// Packet identifier
    pub message_id: u16,
    /// Next retransmission time
    pub deadline: Instant,
    /// Number of retransmissions so far
    pub retries: u32,
}

/// Unacknowledged publishes, in insertion order until the first removal
#[derive(Debug)]
pub struct InflightTracker {
    messages: Vec<InflightMessage>,
    window: Duration,
    limit: usize,
}

impl Default for InflightTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::with_window(ACK_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            messages: Vec::new(),
            window,
            limit: usize::MAX,
        }
    }

    /// Refuse new entries once `limit` are inflight
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a publish awaiting acknowledgement
    ///
    /// Returns false when the tracker is full or storage could not be
    /// grown; the message is then left untracked.
    pub fn add(&mut self, topic: Arc<str>, message_id: u16, payload: Bytes, now: Instant) -> bool {
        if self.messages.len() >= self.limit {
            warn!("Inflight tracker full at {} entries", self.limit);
            return false;
        }
        if self.messages.len() == self.messages.capacity() {
            let capacity = self.messages.capacity();
            let target = if capacity < MIN_CAPACITY {
                MIN_CAPACITY
            } else {
                capacity + capacity / 2
            };
            if let Err(e) = self.messages.try_reserve_exact(target - self.messages.len()) {
                warn!(
                    "Inflight tracker could not grow to {} entries: {}",
                    target, e
                );
                return false;
            }
        }

        self.messages.push(InflightMessage {
            topic,
            payload,
            message_id,
            deadline: now + self.window,
            retries: 0,
        });
        true
    }

    /// Drop the entry with the given id
    ///
    /// Returns false if no such entry is inflight.
    pub fn remove(&mut self, message_id: u16) -> bool {
        match self
            .messages
            .iter()
            .position(|m| m.message_id == message_id)
        {
            Some(index) => {
                self.messages.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Pass every expired entry to `resend` and push its deadline out
    ///
    /// Returns the number of entries resent.
    pub fn sweep<F>(&mut self, now: Instant, mut resend: F) -> usize
    where
        F: FnMut(&InflightMessage),
    {
        let mut count = 0;
        for message in self.messages.iter_mut().filter(|m| m.deadline <= now) {
            message.deadline = now + self.window;
            message.retries += 1;
            resend(message);
            count += 1;
        }
        count
    }

    /// Release every entry and the storage behind them
    pub fn clear(&mut self) {
        self.messages = Vec::new();
    }

    pub fn get(&self, message_id: u16) -> Option<&InflightMessage> {
        self.messages.iter().find(|m| m.message_id == message_id)
    }

    pub fn contains(&self, message_id: u16) -> bool {
        self.get(message_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InflightMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.messages.capacity()
    }
}
