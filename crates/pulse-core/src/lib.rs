//! # pulse-core
//!
//! Foundation types for the pulse real-time messaging client.
//!
//! This crate provides the shared vocabulary the client crates depend on:
//!
//! - **Branded IDs**: `ConnectionId`, `MessageId`, `SubscriptionId` as
//!   newtypes for type safety
//! - **Envelope**: the tagged wire message (`MessageType` discriminant,
//!   per-variant constructors) plus subscription control payloads
//! - **Filters**: predicate evaluation over payload fields
//! - **Errors**: `PulseError` hierarchy via `thiserror`
//! - **Backoff**: reconnect delay math with jitter

#![deny(unsafe_code)]

pub mod backoff;
pub mod envelope;
pub mod errors;
pub mod filter;
pub mod ids;

pub use backoff::BackoffConfig;
pub use envelope::{
    BatchConfig, Envelope, MessageMetadata, MessageType, QosLevel, SubscribeOptions,
    SubscribeRequest, SubscriptionAck, SubscriptionStatus,
};
pub use errors::{
    ProtocolError, PulseError, RateLimitError, Result, SubscriptionError, TimeoutError,
    TransportError,
};
pub use filter::{FilterOp, FilterSpec};
pub use ids::{ConnectionId, MessageId, SubscriptionId};
