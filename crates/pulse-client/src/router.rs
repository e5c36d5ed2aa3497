//! Inbound frame routing and request/response correlation.
//!
//! Every inbound frame passes through [`MessageRouter::route`]: parse
//! failures become isolated [`ProtocolError`]s (the dispatch loop keeps
//! going), responses resolve their pending request by correlation id,
//! deliverable messages fan out through the subscription registry, and
//! ping/pong go to the heartbeat — never to application handlers.
//!
//! The router also owns the pending-request table. Deadlines are monotonic;
//! a response arriving after its request already timed out is discarded and
//! logged rather than resurrecting a completed call, and a periodic sweep
//! purges anything the deadline timer missed.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use pulse_core::{
    Envelope, MessageId, MessageType, ProtocolError, PulseError, SubscriptionAck, TimeoutError,
};

use crate::registry::SubscriptionRegistry;

/// What the connection actor should do after routing one frame.
#[derive(Debug)]
pub enum RouteAction {
    /// Nothing further; any fan-out already happened.
    Done,
    /// The server pinged us: send this pong back.
    ReplyPong(Envelope),
    /// A pong arrived: hand it to the heartbeat monitor.
    Pong(Envelope),
    /// A QoS delivery wants this ack sent back.
    SendAck(Envelope),
}

/// Result of routing one frame.
#[derive(Debug)]
pub struct RouteOutcome {
    /// Follow-up action for the actor.
    pub action: RouteAction,
    /// Error to publish on the connection's error channel (e.g. a rejected
    /// subscription).
    pub error: Option<PulseError>,
}

impl RouteOutcome {
    fn done() -> Self {
        Self {
            action: RouteAction::Done,
            error: None,
        }
    }

    fn action(action: RouteAction) -> Self {
        Self {
            action,
            error: None,
        }
    }
}

/// A request awaiting its response.
struct PendingRequest {
    envelope: Envelope,
    deadline: Instant,
    timeout: Duration,
    retries_remaining: u32,
    attempts: u32,
    started: Instant,
    reply: oneshot::Sender<Result<Envelope, PulseError>>,
}

/// Demultiplexes inbound frames and correlates request/response pairs.
#[derive(Default)]
pub struct MessageRouter {
    pending: HashMap<MessageId, PendingRequest>,
    discarded_responses: u64,
}

impl MessageRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one raw inbound frame.
    ///
    /// A parse failure is returned as a [`ProtocolError`] for the error
    /// channel; it never interrupts processing of subsequent frames.
    pub fn route(
        &mut self,
        raw: &str,
        registry: &mut SubscriptionRegistry,
    ) -> Result<RouteOutcome, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| ProtocolError::new(e.to_string(), raw))?;

        match envelope.kind {
            MessageType::Response => {
                self.resolve_response(envelope);
                Ok(RouteOutcome::done())
            }
            MessageType::Error => {
                self.resolve_error(&envelope);
                Ok(RouteOutcome::done())
            }
            MessageType::Ping => {
                Ok(RouteOutcome::action(RouteAction::ReplyPong(Envelope::pong(
                    envelope.id,
                ))))
            }
            MessageType::Pong => Ok(RouteOutcome::action(RouteAction::Pong(envelope))),
            MessageType::Ack => Ok(self.handle_ack(envelope, registry)),
            MessageType::Event | MessageType::Notification | MessageType::Broadcast => {
                let result = registry.dispatch(&envelope);
                if result.matched == 0 {
                    debug!(topic = %envelope.topic, "no subscriber for topic, message dropped");
                    return Ok(RouteOutcome::done());
                }
                if result.needs_ack {
                    let ack = Envelope::ack(envelope.topic.clone(), envelope.id);
                    return Ok(RouteOutcome::action(RouteAction::SendAck(ack)));
                }
                Ok(RouteOutcome::done())
            }
            MessageType::Request | MessageType::Subscribe | MessageType::Unsubscribe => {
                debug!(kind = ?envelope.kind, "unexpected client-bound frame type, dropped");
                Ok(RouteOutcome::done())
            }
        }
    }

    fn resolve_response(&mut self, envelope: Envelope) {
        let Some(correlation) = envelope.correlation_id.clone() else {
            warn!(message_id = %envelope.id, "response without correlationId, discarded");
            self.discarded_responses += 1;
            return;
        };
        match self.pending.remove(&correlation) {
            Some(pending) => {
                let _ = pending.reply.send(Ok(envelope));
            }
            None => {
                // Already timed out (or cancelled): do not resurrect.
                debug!(correlation_id = %correlation, "response for unknown request, discarded");
                self.discarded_responses += 1;
            }
        }
    }

    fn resolve_error(&mut self, envelope: &Envelope) {
        let Some(correlation) = envelope.correlation_id.as_ref() else {
            warn!(message_id = %envelope.id, topic = %envelope.topic, "server error frame");
            return;
        };
        if let Some(pending) = self.pending.remove(correlation) {
            let message = envelope
                .data
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("request failed")
                .to_owned();
            let _ = pending.reply.send(Err(PulseError::Server { message }));
        } else {
            debug!(correlation_id = %correlation, "error frame for unknown request, discarded");
            self.discarded_responses += 1;
        }
    }

    fn handle_ack(
        &mut self,
        envelope: Envelope,
        registry: &mut SubscriptionRegistry,
    ) -> RouteOutcome {
        // An ack correlated to one of our requests resolves it; otherwise
        // it is a subscription ack.
        if let Some(correlation) = envelope.correlation_id.clone() {
            if let Some(pending) = self.pending.remove(&correlation) {
                let _ = pending.reply.send(Ok(envelope));
                return RouteOutcome::done();
            }
        }
        match serde_json::from_value::<SubscriptionAck>(envelope.data.clone()) {
            Ok(ack) => {
                let error = registry.on_ack(&ack).map(PulseError::Subscription);
                RouteOutcome {
                    action: RouteAction::Done,
                    error,
                }
            }
            Err(_) => {
                debug!(message_id = %envelope.id, "uncorrelated ack frame, dropped");
                RouteOutcome::done()
            }
        }
    }

    // ── Pending request table ───────────────────────────────────────

    /// Register a pending request. The envelope is kept for retries.
    pub fn register_request(
        &mut self,
        envelope: Envelope,
        timeout: Duration,
        retries: u32,
        reply: oneshot::Sender<Result<Envelope, PulseError>>,
        now: Instant,
    ) {
        let id = envelope.id.clone();
        let _ = self.pending.insert(
            id,
            PendingRequest {
                envelope,
                deadline: now + timeout,
                timeout,
                retries_remaining: retries,
                attempts: 1,
                started: now,
                reply,
            },
        );
    }

    /// Earliest pending deadline, for the actor's timer arm.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Handle due deadlines: requests with retry budget left are returned
    /// for re-sending with a fresh deadline; exhausted ones fail with
    /// [`TimeoutError`]. Also serves as the periodic sweep.
    pub fn expire_due(&mut self, now: Instant) -> Vec<Envelope> {
        self.drop_cancelled();
        let due: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut resend = Vec::new();
        for id in due {
            let Some(mut pending) = self.pending.remove(&id) else {
                continue;
            };
            if pending.retries_remaining > 0 {
                pending.retries_remaining -= 1;
                pending.attempts += 1;
                pending.deadline = now + pending.timeout;
                debug!(
                    request_id = %id,
                    attempt = pending.attempts,
                    "request timed out, retrying"
                );
                resend.push(pending.envelope.clone());
                let _ = self.pending.insert(id, pending);
            } else {
                warn!(request_id = %id, attempts = pending.attempts, "request failed: retries exhausted");
                let timeout = TimeoutError {
                    request_id: id.to_string(),
                    attempts: pending.attempts,
                    elapsed: now.saturating_duration_since(pending.started),
                };
                let _ = pending.reply.send(Err(PulseError::Timeout(timeout)));
            }
        }
        resend
    }

    /// Reconnect replay: requests still within their deadline are returned
    /// for re-sending with their remaining time budget; elapsed ones fail
    /// immediately.
    pub fn replay_pending(&mut self, now: Instant) -> Vec<Envelope> {
        self.drop_cancelled();
        let elapsed_ids: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in elapsed_ids {
            if let Some(pending) = self.pending.remove(&id) {
                let timeout = TimeoutError {
                    request_id: id.to_string(),
                    attempts: pending.attempts,
                    elapsed: now.saturating_duration_since(pending.started),
                };
                let _ = pending.reply.send(Err(PulseError::Timeout(timeout)));
            }
        }

        let mut live: Vec<&PendingRequest> = self.pending.values().collect();
        live.sort_by_key(|p| p.started);
        live.iter().map(|p| p.envelope.clone()).collect()
    }

    /// A caller that dropped its reply future has cancelled the request:
    /// the entry and its timer die with it, and it is never retried.
    fn drop_cancelled(&mut self) {
        self.pending.retain(|id, p| {
            if p.reply.is_closed() {
                debug!(request_id = %id, "request cancelled by caller, dropped");
                false
            } else {
                true
            }
        });
    }

    /// Fail every pending request with a terminal error.
    pub fn fail_all(&mut self, make_err: impl Fn() -> PulseError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(make_err()));
        }
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Responses discarded because no pending request matched.
    #[must_use]
    pub fn discarded_responses(&self) -> u64 {
        self.discarded_responses
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
