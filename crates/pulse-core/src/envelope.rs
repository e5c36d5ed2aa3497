//! Wire-format message envelope.
//!
//! Every frame on the socket is one JSON object in this shape:
//!
//! ```json
//! {"id": "...", "topic": "...", "type": "event", "data": {...}, "timestamp": "..."}
//! ```
//!
//! The `type` field is a closed enum ([`MessageType`]); payload conventions
//! are fixed per variant through the constructors on [`Envelope`], so
//! application code never builds a loosely-shaped frame by hand.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::FilterSpec;
use crate::ids::{MessageId, SubscriptionId};

/// Closed set of wire message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Caller-initiated request expecting a correlated response.
    Request,
    /// Response to a request, linked via `correlationId`.
    Response,
    /// Topic event pushed by the server.
    Event,
    /// Server notification (delivered like an event).
    Notification,
    /// Server-reported error frame.
    Error,
    /// Delivery acknowledgement (QoS ≥ 1).
    Ack,
    /// Liveness probe.
    Ping,
    /// Liveness probe response.
    Pong,
    /// Subscription control frame.
    Subscribe,
    /// Unsubscription control frame.
    Unsubscribe,
    /// Event fanned out to all subscribers of a topic.
    Broadcast,
}

impl MessageType {
    /// Whether this type is delivered to application topic handlers.
    #[must_use]
    pub fn is_deliverable(self) -> bool {
        matches!(self, Self::Event | Self::Notification | Self::Broadcast)
    }
}

/// Optional per-message metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Logical sender identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Relative priority hint (carried on the wire, does not reorder the
    /// outbound queue).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// Time-to-live in milliseconds; expired messages are dropped instead
    /// of replayed after a reconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Payload is compressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,
    /// Payload is encrypted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
}

/// One wire frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique message identifier (unique within a connection's lifetime).
    pub id: MessageId,
    /// Logical channel this message belongs to.
    pub topic: String,
    /// Message discriminant.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Optional action name qualifying a request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Opaque application payload.
    pub data: Value,
    /// ISO-8601 wall-clock timestamp (informational only; deadlines use the
    /// monotonic clock).
    pub timestamp: String,
    /// Optional metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    /// For responses and acks: the id of the originating message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,
    /// Topic to address a reply to, if different from `topic`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl Envelope {
    /// Create an envelope with a fresh id and the current timestamp.
    fn new(topic: impl Into<String>, kind: MessageType, data: Value) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            kind,
            action: None,
            data,
            timestamp: now_iso8601(),
            metadata: None,
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Build a topic event.
    #[must_use]
    pub fn event(topic: impl Into<String>, data: Value) -> Self {
        Self::new(topic, MessageType::Event, data)
    }

    /// Build a request, optionally qualified by an action name.
    #[must_use]
    pub fn request(topic: impl Into<String>, action: Option<String>, data: Value) -> Self {
        let mut env = Self::new(topic, MessageType::Request, data);
        env.action = action;
        env
    }

    /// Build a response correlated to `request_id`.
    #[must_use]
    pub fn response(topic: impl Into<String>, request_id: MessageId, data: Value) -> Self {
        let mut env = Self::new(topic, MessageType::Response, data);
        env.correlation_id = Some(request_id);
        env
    }

    /// Build a ping probe on the reserved heartbeat topic.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(HEARTBEAT_TOPIC, MessageType::Ping, Value::Null)
    }

    /// Build a pong answering the given ping.
    #[must_use]
    pub fn pong(ping_id: MessageId) -> Self {
        let mut env = Self::new(HEARTBEAT_TOPIC, MessageType::Pong, Value::Null);
        env.correlation_id = Some(ping_id);
        env
    }

    /// Build a delivery acknowledgement for `message_id` (QoS ≥ 1).
    #[must_use]
    pub fn ack(topic: impl Into<String>, message_id: MessageId) -> Self {
        let mut env = Self::new(topic, MessageType::Ack, Value::Null);
        env.correlation_id = Some(message_id);
        env
    }

    /// Build a subscribe control frame.
    ///
    /// # Panics
    ///
    /// Never panics: `SubscribeRequest` serializes infallibly (no maps with
    /// non-string keys).
    #[must_use]
    pub fn subscribe(request: &SubscribeRequest) -> Self {
        let data = serde_json::to_value(request).unwrap_or(Value::Null);
        Self::new(CONTROL_TOPIC, MessageType::Subscribe, data)
    }

    /// Build an unsubscribe control frame for the given topics.
    #[must_use]
    pub fn unsubscribe(topics: &[String]) -> Self {
        let data = serde_json::json!({ "topics": topics });
        Self::new(CONTROL_TOPIC, MessageType::Unsubscribe, data)
    }

    /// Attach metadata, replacing any existing metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Set a time-to-live without touching other metadata fields.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        let meta = self.metadata.get_or_insert_with(MessageMetadata::default);
        meta.ttl_ms = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Time-to-live, if one is set in the metadata.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.metadata
            .as_ref()
            .and_then(|m| m.ttl_ms)
            .map(Duration::from_millis)
    }
}

/// Reserved topic for heartbeat frames.
pub const HEARTBEAT_TOPIC: &str = "$sys/heartbeat";

/// Reserved topic for subscription control frames.
pub const CONTROL_TOPIC: &str = "$sys/control";

// ─────────────────────────────────────────────────────────────────────────────
// Subscription control payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Delivery guarantee level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QosLevel {
    /// At-most-once: fire and forget.
    #[default]
    AtMostOnce = 0,
    /// At-least-once: delivery acknowledged.
    AtLeastOnce = 1,
    /// Exactly-once: acknowledged with server-side dedup.
    ExactlyOnce = 2,
}

/// Server-side batching configuration carried in subscribe options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    /// Maximum messages per batch.
    pub size: u32,
    /// Maximum time to hold a partial batch, in milliseconds.
    pub interval_ms: u64,
}

/// Options attached to a subscription.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOptions {
    /// Delivery guarantee level.
    #[serde(default)]
    pub qos: QosLevel,
    /// Whether deliveries must be acknowledged by the client.
    #[serde(default)]
    pub ack_required: bool,
    /// Server-side batching, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchConfig>,
}

/// Payload of a `subscribe` control frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Subscription id, chosen by the client and echoed in the ack.
    pub subscription_id: SubscriptionId,
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Optional filter predicates applied server-side and client-side.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub filters: Vec<FilterSpec>,
    /// Subscription options.
    #[serde(default)]
    pub options: SubscribeOptions,
}

/// Status reported in a subscription ack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Subscribe sent, ack not yet received.
    Pending,
    /// Server accepted the subscription.
    Active,
    /// Server rejected the subscription.
    Error,
}

/// Payload of a subscription-ack frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionAck {
    /// Echoed subscription id.
    pub subscription_id: SubscriptionId,
    /// Topics the ack covers.
    pub topics: Vec<String>,
    /// Resulting status.
    pub status: SubscriptionStatus,
    /// Rejection reason when `status == Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_with_camel_case_type_tag() {
        let env = Envelope::event("metrics", json!({"cpu": 55.5}));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "event");
        assert_eq!(v["topic"], "metrics");
        assert_eq!(v["data"]["cpu"], 55.5);
        assert!(v.get("correlationId").is_none());
        assert!(v.get("action").is_none());
    }

    #[test]
    fn wire_frame_deserializes() {
        let raw = r#"{"id":"m1","topic":"metrics","type":"event","data":{"cpu":55.5},"timestamp":"2026-01-01T00:00:00.000Z"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.id.as_str(), "m1");
        assert_eq!(env.kind, MessageType::Event);
        assert_eq!(env.data["cpu"], 55.5);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"id":"m1","topic":"t","type":"telepathy","data":null,"timestamp":"now"}"#;
        let result = serde_json::from_str::<Envelope>(raw);
        assert!(result.is_err());
    }

    #[test]
    fn response_carries_correlation_id() {
        let req = Envelope::request("agents", Some("list".into()), json!({}));
        let resp = Envelope::response("agents", req.id.clone(), json!({"agents": []}));
        assert_eq!(resp.correlation_id.as_ref(), Some(&req.id));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["correlationId"], req.id.as_str());
    }

    #[test]
    fn ping_and_pong_use_heartbeat_topic() {
        let ping = Envelope::ping();
        assert_eq!(ping.topic, HEARTBEAT_TOPIC);
        assert_eq!(ping.kind, MessageType::Ping);

        let pong = Envelope::pong(ping.id.clone());
        assert_eq!(pong.kind, MessageType::Pong);
        assert_eq!(pong.correlation_id, Some(ping.id));
    }

    #[test]
    fn subscribe_frame_carries_topics_and_options() {
        let req = SubscribeRequest {
            subscription_id: SubscriptionId::from("sub_1"),
            topics: vec!["metrics".into(), "alerts".into()],
            filters: vec![],
            options: SubscribeOptions {
                qos: QosLevel::AtLeastOnce,
                ack_required: true,
                batch: Some(BatchConfig {
                    size: 10,
                    interval_ms: 250,
                }),
            },
        };
        let env = Envelope::subscribe(&req);
        assert_eq!(env.kind, MessageType::Subscribe);
        assert_eq!(env.data["topics"][1], "alerts");
        assert_eq!(env.data["options"]["qos"], "atLeastOnce");
        assert_eq!(env.data["options"]["batch"]["size"], 10);
    }

    #[test]
    fn subscription_ack_roundtrip() {
        let raw = r#"{"subscriptionId":"sub_1","topics":["metrics"],"status":"active"}"#;
        let ack: SubscriptionAck = serde_json::from_str(raw).unwrap();
        assert_eq!(ack.status, SubscriptionStatus::Active);
        assert!(ack.error.is_none());
    }

    #[test]
    fn rejected_ack_carries_error() {
        let raw = r#"{"subscriptionId":"sub_2","topics":["secret"],"status":"error","error":"forbidden"}"#;
        let ack: SubscriptionAck = serde_json::from_str(raw).unwrap();
        assert_eq!(ack.status, SubscriptionStatus::Error);
        assert_eq!(ack.error.as_deref(), Some("forbidden"));
    }

    #[test]
    fn ttl_metadata_roundtrip() {
        let env = Envelope::event("t", json!(1)).with_ttl(Duration::from_millis(1500));
        assert_eq!(env.ttl(), Some(Duration::from_millis(1500)));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["metadata"]["ttlMs"], 1500);
    }

    #[test]
    fn no_ttl_by_default() {
        let env = Envelope::event("t", json!(1));
        assert_eq!(env.ttl(), None);
    }

    #[test]
    fn deliverable_types() {
        assert!(MessageType::Event.is_deliverable());
        assert!(MessageType::Notification.is_deliverable());
        assert!(MessageType::Broadcast.is_deliverable());
        assert!(!MessageType::Ping.is_deliverable());
        assert!(!MessageType::Response.is_deliverable());
        assert!(!MessageType::Subscribe.is_deliverable());
    }

    #[test]
    fn message_ids_are_fresh_per_envelope() {
        let a = Envelope::event("t", json!(null));
        let b = Envelope::event("t", json!(null));
        assert_ne!(a.id, b.id);
    }
}
