//! Token-bucket throttle for outbound sends.
//!
//! One bucket per connection: capacity bounds the burst size, the refill
//! rate bounds sustained throughput. The bucket itself never sleeps — the
//! connection actor asks [`RateLimiter::next_token_at`] when a token will
//! exist and arms its own timer, so a throttled send suspends only that
//! send and never the event loop.

use std::time::Duration;

use tokio::time::Instant;

/// Token bucket over the monotonic clock.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a full bucket.
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// When the next token will be available (`now` if one already is).
    pub fn next_token_at(&mut self, now: Instant) -> Instant {
        self.refill(now);
        if self.tokens >= 1.0 {
            now
        } else {
            let missing = 1.0 - self.tokens;
            now + Duration::from_secs_f64(missing / self.refill_per_sec)
        }
    }

    /// How long until the next token: the `retry_after` hint carried by a
    /// rate-limit error.
    pub fn retry_after(&mut self, now: Instant) -> Duration {
        self.next_token_at(now).saturating_duration_since(now)
    }

    /// Tokens currently in the bucket (after refill).
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
