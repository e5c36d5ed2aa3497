//! Heartbeat liveness state machine.
//!
//! The connection actor owns the timer; this module only decides what the
//! next deadline means. Every `interval` a ping goes out, and the matching
//! pong must arrive within half the interval. A missing pong increments the
//! missed counter; reaching the threshold declares the link dead and hands
//! control to the reconnect cycle without waiting for the socket to error.
//! Pong round-trips feed an exponentially weighted latency estimate.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use pulse_core::{Envelope, MessageId};

/// Weight of the newest sample in the latency estimate.
const LATENCY_ALPHA: f64 = 0.2;

/// What the actor should do when a heartbeat deadline fires.
#[derive(Debug)]
pub enum HeartbeatAction {
    /// Write this ping to the socket (bypassing queue and rate limiter).
    SendPing(Envelope),
    /// Too many pongs missed: treat the link as dead.
    LinkDead,
}

enum HbState {
    /// Not running (interval zero, or connection down).
    Disabled,
    /// Connected, waiting for the next ping slot.
    Idle { next_ping: Instant },
    /// Ping sent, pong outstanding.
    Awaiting {
        id: MessageId,
        sent_at: Instant,
        deadline: Instant,
    },
}

/// Per-connection heartbeat monitor.
pub struct HeartbeatMonitor {
    state: HbState,
    interval: Duration,
    max_missed: u32,
    missed: u32,
    latency: Option<Duration>,
}

impl HeartbeatMonitor {
    /// Create a monitor. A zero interval disables heartbeats entirely.
    #[must_use]
    pub fn new(interval: Duration, max_missed: u32) -> Self {
        Self {
            state: HbState::Disabled,
            interval,
            max_missed: max_missed.max(1),
            missed: 0,
            latency: None,
        }
    }

    /// Arm the monitor after a (re)connect. The first ping fires one full
    /// interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.missed = 0;
        if self.interval.is_zero() {
            self.state = HbState::Disabled;
        } else {
            self.state = HbState::Idle {
                next_ping: now + self.interval,
            };
        }
    }

    /// Disarm the monitor when the connection drops.
    pub fn stop(&mut self) {
        self.state = HbState::Disabled;
    }

    /// The instant the actor's heartbeat timer should fire next.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            HbState::Disabled => None,
            HbState::Idle { next_ping } => Some(*next_ping),
            HbState::Awaiting { deadline, .. } => Some(*deadline),
        }
    }

    /// Handle a fired deadline.
    pub fn on_deadline(&mut self, now: Instant) -> Option<HeartbeatAction> {
        match &self.state {
            HbState::Disabled => None,
            HbState::Idle { next_ping } => {
                if *next_ping > now {
                    return None;
                }
                let ping = Envelope::ping();
                self.state = HbState::Awaiting {
                    id: ping.id.clone(),
                    sent_at: now,
                    // The pong gets half an interval before it counts as
                    // missed.
                    deadline: now + self.interval / 2,
                };
                Some(HeartbeatAction::SendPing(ping))
            }
            HbState::Awaiting { deadline, sent_at, .. } => {
                let (deadline, sent_at) = (*deadline, *sent_at);
                if deadline > now {
                    return None;
                }
                self.missed += 1;
                if self.missed >= self.max_missed {
                    warn!(missed = self.missed, "heartbeat threshold reached, link presumed dead");
                    self.state = HbState::Disabled;
                    return Some(HeartbeatAction::LinkDead);
                }
                debug!(missed = self.missed, "heartbeat pong missed");
                // Keep the original cadence for the next ping.
                self.state = HbState::Idle {
                    next_ping: sent_at + self.interval,
                };
                None
            }
        }
    }

    /// Handle an inbound pong. Returns the round-trip time when the pong
    /// answers the outstanding ping; stale or unsolicited pongs are ignored.
    pub fn on_pong(&mut self, correlation: Option<&MessageId>, now: Instant) -> Option<Duration> {
        let HbState::Awaiting { id, sent_at, .. } = &self.state else {
            debug!("unsolicited pong ignored");
            return None;
        };
        if correlation.is_some_and(|c| c != id) {
            debug!("pong for a stale ping ignored");
            return None;
        }
        let rtt = now.saturating_duration_since(*sent_at);
        let next_ping = *sent_at + self.interval;
        self.missed = 0;
        self.latency = Some(match self.latency {
            None => rtt,
            Some(prev) => Duration::from_secs_f64(
                prev.as_secs_f64() * (1.0 - LATENCY_ALPHA) + rtt.as_secs_f64() * LATENCY_ALPHA,
            ),
        });
        self.state = HbState::Idle { next_ping };
        Some(rtt)
    }

    /// Smoothed round-trip latency estimate.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Pongs missed since the last successful round trip.
    #[must_use]
    pub fn missed(&self) -> u32 {
        self.missed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
