//! Bounded outbound FIFO.
//!
//! While a connection is down (or the rate limiter has no token), outbound
//! messages wait here instead of failing. The queue is bounded: overflow
//! drops the *oldest* entry and increments a drop counter, so memory stays
//! bounded under a sustained disconnect while the most recent messages
//! survive for replay. TTL expiry is enforced when entries are popped for
//! sending, not at enqueue time.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use pulse_core::{Envelope, PulseError};

/// One queued outbound message.
pub struct QueueEntry {
    /// The message to send.
    pub envelope: Envelope,
    /// When the entry was queued (monotonic).
    pub enqueued_at: Instant,
    /// Deadline after which the entry is dropped instead of sent.
    pub deadline: Instant,
    /// Send attempts made so far.
    pub attempts: u32,
    /// Resolved when the message is written or dropped.
    pub notify: Option<oneshot::Sender<Result<(), PulseError>>>,
}

/// Bounded per-connection outbound queue.
pub struct OutboundQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
    default_ttl: Duration,
    dropped_overflow: u64,
    dropped_expired: u64,
}

impl OutboundQueue {
    /// Create a queue with the given capacity and default TTL.
    #[must_use]
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            default_ttl,
            dropped_overflow: 0,
            dropped_expired: 0,
        }
    }

    /// Append a message. If the queue is full, the oldest entry is dropped
    /// (its notifier resolves with an error) and the drop counter
    /// increments.
    pub fn enqueue(
        &mut self,
        envelope: Envelope,
        notify: Option<oneshot::Sender<Result<(), PulseError>>>,
        now: Instant,
    ) {
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                self.dropped_overflow += 1;
                debug!(
                    message_id = %oldest.envelope.id,
                    dropped_total = self.dropped_overflow,
                    "outbound queue full, dropping oldest entry"
                );
                Self::resolve_dropped(oldest, "outbound queue overflow");
            }
        }
        let ttl = envelope.ttl().unwrap_or(self.default_ttl);
        // An absurd TTL would overflow the Instant; cap it far enough out
        // that the deadline never fires.
        let deadline = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365));
        self.entries.push_back(QueueEntry {
            envelope,
            enqueued_at: now,
            deadline,
            attempts: 0,
            notify,
        });
    }

    /// Remove and return the oldest live entry, dropping expired entries
    /// along the way.
    pub fn pop_live(&mut self, now: Instant) -> Option<QueueEntry> {
        while let Some(entry) = self.entries.pop_front() {
            if entry.deadline <= now {
                self.dropped_expired += 1;
                debug!(
                    message_id = %entry.envelope.id,
                    "queued message expired before send"
                );
                Self::resolve_dropped(entry, "queued message ttl expired");
                continue;
            }
            return Some(entry);
        }
        None
    }

    /// Pop the head entry if its deadline has passed, leaving resolution to
    /// the caller (the drop cause depends on why the flush stalled). Counts
    /// as an expiry drop.
    pub fn pop_expired(&mut self, now: Instant) -> Option<QueueEntry> {
        if self.entries.front().is_some_and(|e| e.deadline <= now) {
            self.dropped_expired += 1;
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Peek at the head entry's deadline without popping.
    #[must_use]
    pub fn head_deadline(&self) -> Option<Instant> {
        self.entries.front().map(|e| e.deadline)
    }

    /// Re-queue an entry at the front (e.g. after a failed write) so FIFO
    /// order is preserved.
    pub fn push_front(&mut self, entry: QueueEntry) {
        self.entries.push_front(entry);
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries dropped due to overflow.
    #[must_use]
    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow
    }

    /// Entries dropped due to TTL expiry.
    #[must_use]
    pub fn dropped_expired(&self) -> u64 {
        self.dropped_expired
    }

    /// Fail every queued entry with a terminal error and clear the queue.
    pub fn fail_all(&mut self, make_err: impl Fn() -> PulseError) {
        for entry in self.entries.drain(..) {
            if let Some(notify) = entry.notify {
                let _ = notify.send(Err(make_err()));
            }
        }
    }

    fn resolve_dropped(entry: QueueEntry, reason: &str) {
        if let Some(notify) = entry.notify {
            let _ = notify.send(Err(PulseError::Transport(
                pulse_core::TransportError::Io(reason.to_owned()),
            )));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
