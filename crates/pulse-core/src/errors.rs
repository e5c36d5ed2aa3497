//! Error hierarchy for the messaging layer.
//!
//! Built on [`thiserror`]:
//!
//! - [`PulseError`]: top-level enum covering all error domains
//! - [`TransportError`]: socket-level failures (drive the reconnect cycle)
//! - [`ProtocolError`]: malformed frames (isolated, never fatal)
//! - [`TimeoutError`]: a request exceeded its deadline after all retries
//! - [`RateLimitError`]: a send was throttled, with a `retry_after` hint
//! - [`SubscriptionError`]: the server rejected a subscribe request
//!
//! Transport and protocol errors are recovered internally; timeout,
//! subscription, and terminal connection errors surface to the caller.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the messaging client.
#[derive(Debug, Error)]
pub enum PulseError {
    /// Socket-level failure.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Malformed inbound frame.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Request deadline exceeded after exhausting retries.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Outbound send throttled past its deadline.
    #[error("{0}")]
    RateLimit(#[from] RateLimitError),

    /// Server rejected a subscription.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// The server answered a request with an `error` frame.
    #[error("server error: {message}")]
    Server {
        /// Server-supplied error description.
        message: String,
    },

    /// The connection was closed by an explicit `disconnect()` call.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection exhausted its reconnect attempts and will not
    /// self-heal; the caller must create a fresh connection.
    #[error("connection failed after {attempts} reconnect attempts")]
    ConnectionFailed {
        /// Number of attempts made before giving up.
        attempts: u32,
    },
}

impl PulseError {
    /// Whether this error is terminal: the owning connection is gone and
    /// no amount of waiting will revive it.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::ConnectionFailed { .. })
    }
}

/// Socket-level failure. Always recovered internally by the reconnect
/// cycle; only surfaces when a connection is already terminal.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    ConnectFailed {
        /// Target url.
        url: String,
        /// Underlying failure description.
        reason: String,
    },

    /// A send was attempted while the socket was not open.
    #[error("transport is not connected")]
    NotConnected,

    /// The socket failed mid-stream.
    #[error("transport io error: {0}")]
    Io(String),

    /// The peer closed the socket.
    #[error("transport closed: code={code:?} reason={reason:?}")]
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason, if the peer sent one.
        reason: Option<String>,
    },
}

/// A frame that could not be parsed into an envelope. Isolated per-frame;
/// subsequent frames are unaffected.
#[derive(Debug, Error)]
#[error("malformed frame: {reason}")]
pub struct ProtocolError {
    /// Parse failure description.
    pub reason: String,
    /// A bounded prefix of the offending frame, for diagnostics.
    pub frame_prefix: String,
}

impl ProtocolError {
    /// Maximum number of characters of the raw frame kept for diagnostics.
    const PREFIX_LEN: usize = 128;

    /// Build a protocol error from a parse failure and the raw frame.
    #[must_use]
    pub fn new(reason: impl Into<String>, raw_frame: &str) -> Self {
        Self {
            reason: reason.into(),
            frame_prefix: raw_frame.chars().take(Self::PREFIX_LEN).collect(),
        }
    }
}

/// A request exceeded its deadline after exhausting its retry budget.
#[derive(Debug, Error)]
#[error("request {request_id} timed out after {attempts} attempts ({elapsed:?})")]
pub struct TimeoutError {
    /// Id of the timed-out request.
    pub request_id: String,
    /// Total attempts made (initial send plus retries).
    pub attempts: u32,
    /// Total time elapsed across all attempts.
    pub elapsed: Duration,
}

/// A send could not acquire a rate-limit token within its deadline.
#[derive(Debug, Error)]
#[error("rate limited; retry after {retry_after:?}")]
pub struct RateLimitError {
    /// Hint: how long until a token is expected to be available.
    pub retry_after: Duration,
}

/// The server rejected a subscribe request.
#[derive(Debug, Error)]
#[error("subscription {subscription_id} rejected: {reason}")]
pub struct SubscriptionError {
    /// Id of the rejected subscription.
    pub subscription_id: String,
    /// Server-supplied rejection reason.
    pub reason: String,
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, PulseError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
