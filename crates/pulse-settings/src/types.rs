//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON
//! wire format of `~/.pulse/settings.json`. Each type implements
//! [`Default`] with production default values, and `#[serde(default)]`
//! allows partial JSON — missing fields get their default value during
//! deserialization.

use pulse_core::BackoffConfig;
use serde::{Deserialize, Serialize};

/// Root settings type for the messaging client.
///
/// Loaded from `~/.pulse/settings.json` with defaults applied for missing
/// fields. `PULSE_*` environment variables override specific values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Connection and reconnection behavior.
    pub connection: ConnectionSettings,
    /// Heartbeat liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Outbound queue bounds.
    pub queue: QueueSettings,
    /// Outbound rate limiting.
    pub rate_limit: RateLimitSettings,
}

/// Connection and reconnection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Reconnect backoff parameters.
    pub backoff: BackoffConfig,
    /// Default request deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Default retry budget for requests (re-sends after the first).
    pub request_retries: u32,
    /// Interval between sweeps of the expired-pending-request table, ms.
    pub sweep_interval_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            request_timeout_ms: 10_000,
            request_retries: 2,
            sweep_interval_ms: 5_000,
        }
    }
}

/// Heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Whether heartbeat probing is enabled.
    pub enabled: bool,
    /// Interval between pings in milliseconds. A pong is expected within
    /// half this interval.
    pub interval_ms: u64,
    /// Consecutive missed pongs before the link is declared dead.
    pub max_missed: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            max_missed: 2,
        }
    }
}

/// Outbound queue settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Maximum queued messages per connection; overflow drops the oldest.
    pub capacity: usize,
    /// Default time-to-live for queued messages in milliseconds. Entries
    /// older than this at flush time are dropped, not sent.
    pub default_ttl_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            default_ttl_ms: 60_000,
        }
    }
}

/// Token-bucket rate limit settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    /// Bucket capacity (burst size).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: 32,
            refill_per_sec: 16.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
