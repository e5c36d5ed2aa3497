//! Subscription registry: topic → handler registrations.
//!
//! Registrations are idempotent per (topic-set, options) signature — a
//! duplicate subscribe augments the existing registration's handler list
//! instead of creating a parallel one. Each registration carries a
//! generation counter shared with its handles: unsubscribe bumps the
//! generation, so any delivery already queued to a handler channel but not
//! yet consumed becomes a silent no-op. Handler consumption is decoupled
//! from dispatch through bounded channels, so a slow subscriber on one
//! topic cannot delay delivery to other topics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use pulse_core::envelope::SubscribeOptions;
use pulse_core::filter::matches_all;
use pulse_core::{
    Envelope, FilterSpec, QosLevel, SubscribeRequest, SubscriptionAck, SubscriptionError,
    SubscriptionId, SubscriptionStatus,
};

/// Deliveries buffered per handler before drops apply.
const DELIVERY_CHANNEL_CAPACITY: usize = 64;

/// One delivery in flight to a handler.
struct Delivery {
    envelope: Arc<Envelope>,
    generation: u64,
}

/// Caller side of a subscription.
///
/// Receives envelopes delivered to the owning registration. After the
/// owning unsubscribe returns, `recv` never yields another message, even
/// for deliveries that were already in flight.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    rx: mpsc::Receiver<Delivery>,
    generation: Arc<AtomicU64>,
}

impl SubscriptionHandle {
    /// Id of the owning registration.
    #[must_use]
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Next delivery, skipping anything from a stale generation.
    ///
    /// Returns `None` once the registration is gone and the channel has
    /// drained.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        while let Some(delivery) = self.rx.recv().await {
            if delivery.generation == self.generation.load(Ordering::Acquire) {
                return Some(delivery.envelope);
            }
            // Stale generation: the message was in flight when unsubscribe
            // happened. Dropped silently.
        }
        None
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        while let Ok(delivery) = self.rx.try_recv() {
            if delivery.generation == self.generation.load(Ordering::Acquire) {
                return Some(delivery.envelope);
            }
        }
        None
    }
}

/// Idempotence key: sorted topic set plus options.
#[derive(Clone, PartialEq, Eq, Hash)]
struct Signature {
    topics: Vec<String>,
    options: SubscribeOptions,
}

impl Signature {
    fn new(topics: &[String], options: &SubscribeOptions) -> Self {
        let mut topics: Vec<String> = topics.to_vec();
        topics.sort();
        topics.dedup();
        Self {
            topics,
            options: options.clone(),
        }
    }
}

struct Registration {
    id: SubscriptionId,
    topics: Vec<String>,
    filters: Vec<FilterSpec>,
    options: SubscribeOptions,
    generation: Arc<AtomicU64>,
    status: SubscriptionStatus,
    senders: Vec<mpsc::Sender<Delivery>>,
    order: u64,
    dropped_deliveries: u64,
}

/// Result of registering a subscription.
pub struct SubscribeOutcome {
    /// The caller's receive handle.
    pub handle: SubscriptionHandle,
    /// Control frame to send upstream; `None` when the signature matched
    /// an existing registration.
    pub control: Option<SubscribeRequest>,
}

/// Outcome of dispatching one envelope.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchResult {
    /// Registrations whose topics and filters matched.
    pub matched: usize,
    /// Handler channels the envelope was delivered to.
    pub delivered: usize,
    /// Whether at least one matching registration requires an ack.
    pub needs_ack: bool,
}

/// Registry of topic subscriptions for one connection.
#[derive(Default)]
pub struct SubscriptionRegistry {
    registrations: HashMap<SubscriptionId, Registration>,
    by_signature: HashMap<Signature, SubscriptionId>,
    next_order: u64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription.
    ///
    /// A duplicate (topic-set, options) signature reuses the existing
    /// registration: the same id is returned and the new handle is added
    /// to its handler list, without a second control frame upstream.
    pub fn subscribe(
        &mut self,
        topics: Vec<String>,
        filters: Vec<FilterSpec>,
        options: SubscribeOptions,
    ) -> SubscribeOutcome {
        let signature = Signature::new(&topics, &options);
        let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);

        let existing = self
            .by_signature
            .get(&signature)
            .and_then(|id| self.registrations.get_mut(id));
        if let Some(reg) = existing {
            debug!(subscription_id = %reg.id, "duplicate subscribe, augmenting handler list");
            reg.senders.push(tx);
            return SubscribeOutcome {
                handle: SubscriptionHandle {
                    id: reg.id.clone(),
                    rx,
                    generation: reg.generation.clone(),
                },
                control: None,
            };
        }

        let id = SubscriptionId::new();
        let generation = Arc::new(AtomicU64::new(0));
        let request = SubscribeRequest {
            subscription_id: id.clone(),
            topics: topics.clone(),
            filters: filters.clone(),
            options: options.clone(),
        };
        let order = self.next_order;
        self.next_order += 1;

        let _ = self.registrations.insert(
            id.clone(),
            Registration {
                id: id.clone(),
                topics,
                filters,
                options,
                generation: generation.clone(),
                status: SubscriptionStatus::Pending,
                senders: vec![tx],
                order,
                dropped_deliveries: 0,
            },
        );
        let _ = self.by_signature.insert(signature, id.clone());

        SubscribeOutcome {
            handle: SubscriptionHandle { id, rx, generation },
            control: Some(request),
        }
    }

    /// Remove a registration.
    ///
    /// Bumps its generation first, so in-flight deliveries are dead before
    /// this returns. The returned list holds topics no remaining
    /// registration references — for those an `unsubscribe` control frame
    /// belongs upstream. Returns `None` for an unknown id.
    pub fn unsubscribe(&mut self, id: &SubscriptionId) -> Option<Vec<String>> {
        let reg = self.registrations.remove(id)?;
        let _ = reg.generation.fetch_add(1, Ordering::Release);
        self.by_signature
            .retain(|_, registered| registered != id);

        let released: Vec<String> = reg
            .topics
            .iter()
            .filter(|topic| {
                !self
                    .registrations
                    .values()
                    .any(|other| other.topics.contains(topic))
            })
            .cloned()
            .collect();
        debug!(subscription_id = %id, released = released.len(), "unsubscribed");
        Some(released)
    }

    /// Fan an envelope out to every matching registration.
    pub fn dispatch(&mut self, envelope: &Envelope) -> DispatchResult {
        let shared = Arc::new(envelope.clone());
        let mut result = DispatchResult::default();

        for reg in self.registrations.values_mut() {
            if !reg.topics.iter().any(|t| t == &envelope.topic) {
                continue;
            }
            if !matches_all(&reg.filters, &envelope.data) {
                continue;
            }
            result.matched += 1;
            if reg.options.ack_required || reg.options.qos != QosLevel::AtMostOnce {
                result.needs_ack = true;
            }
            let generation = reg.generation.load(Ordering::Acquire);
            for sender in &reg.senders {
                let delivery = Delivery {
                    envelope: shared.clone(),
                    generation,
                };
                if sender.try_send(delivery).is_ok() {
                    result.delivered += 1;
                } else {
                    reg.dropped_deliveries += 1;
                    warn!(
                        subscription_id = %reg.id,
                        topic = %envelope.topic,
                        "handler channel full or closed, delivery dropped"
                    );
                }
            }
        }
        result
    }

    /// Apply a server subscription ack. Returns the error to surface when
    /// the server rejected the subscription.
    pub fn on_ack(&mut self, ack: &SubscriptionAck) -> Option<SubscriptionError> {
        let Some(reg) = self.registrations.get_mut(&ack.subscription_id) else {
            debug!(subscription_id = %ack.subscription_id, "ack for unknown subscription");
            return None;
        };
        reg.status = ack.status;
        if ack.status == SubscriptionStatus::Error {
            return Some(SubscriptionError {
                subscription_id: ack.subscription_id.to_string(),
                reason: ack
                    .error
                    .clone()
                    .unwrap_or_else(|| "subscription rejected".to_owned()),
            });
        }
        None
    }

    /// Control frames for every live registration, in original subscribe
    /// order. Sent to re-establish subscriptions after a reconnect.
    #[must_use]
    pub fn resubscribe_requests(&self) -> Vec<SubscribeRequest> {
        let mut regs: Vec<&Registration> = self.registrations.values().collect();
        regs.sort_by_key(|r| r.order);
        regs.iter()
            .map(|r| SubscribeRequest {
                subscription_id: r.id.clone(),
                topics: r.topics.clone(),
                filters: r.filters.clone(),
                options: r.options.clone(),
            })
            .collect()
    }

    /// Current status of a registration.
    #[must_use]
    pub fn status(&self, id: &SubscriptionId) -> Option<SubscriptionStatus> {
        self.registrations.get(id).map(|r| r.status)
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether the registry has no registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Total deliveries dropped because a handler channel was full.
    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.registrations
            .values()
            .map(|r| r.dropped_deliveries)
            .sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
