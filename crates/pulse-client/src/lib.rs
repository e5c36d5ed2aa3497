//! # pulse-client
//!
//! Real-time messaging client for dashboard frontends: one WebSocket per
//! named connection, multiplexing topic subscriptions, request/response
//! calls and fire-and-forget publishes.
//!
//! The moving parts:
//!
//! - **`client`** — [`MessagingClient`], the facade owning named connections
//! - **`manager`** — the per-connection actor: lifecycle state machine,
//!   reconnect backoff, and the event loop tying everything together
//! - **`transport`** — the socket seam ([`Transport`]) with the production
//!   WebSocket implementation
//! - **`registry`** — topic subscriptions with generation-counted handles
//! - **`router`** — inbound demultiplexing and request correlation
//! - **`queue`** / **`rate_limit`** — bounded outbound buffering and
//!   token-bucket throttling
//! - **`heartbeat`** — application-level ping/pong liveness
//! - **`testing`** — a scriptable in-memory transport for tests
//!
//! Connections self-heal: a lost socket triggers jittered exponential
//! backoff, resubscription, and replay of queued messages and in-deadline
//! requests. Only an explicit disconnect or an exhausted reconnect budget
//! is terminal.

#![deny(unsafe_code)]

pub mod client;
pub mod heartbeat;
pub mod manager;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod testing;
pub mod transport;

pub use client::MessagingClient;
pub use manager::{ConnectionHandle, ConnectionStats, ConnectionStatus};
pub use registry::SubscriptionHandle;
pub use transport::{Transport, TransportConn, TransportEvent, TransportSink, WsTransport};

// The vocabulary callers need alongside the client.
pub use pulse_core::{
    Envelope, FilterOp, FilterSpec, MessageType, PulseError, QosLevel, Result, SubscribeOptions,
    SubscriptionId, SubscriptionStatus, TransportError,
};
pub use pulse_settings::PulseSettings;
