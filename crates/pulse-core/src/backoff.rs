//! Reconnect backoff calculation.
//!
//! Delay formula: `min(max_delay, base * decay^attempt)` with symmetric
//! jitter, so a fleet of clients losing the same server does not reconnect
//! in lockstep. The math here is sync and deterministic given the random
//! input; the connection actor supplies actual randomness at the call site.

use serde::{Deserialize, Serialize};

/// Default maximum reconnect attempts before the connection is terminal.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default per-attempt delay multiplier.
pub const DEFAULT_DECAY: f64 = 2.0;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Reconnect backoff parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Maximum reconnect attempts before giving up (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for the first retry in ms (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Per-attempt multiplier (default: 2.0).
    #[serde(default = "default_decay")]
    pub decay: f64,
    /// Jitter factor 0.0–1.0 (default: 0.2 = ±20%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_decay() -> f64 {
    DEFAULT_DECAY
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            decay: DEFAULT_DECAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Backoff delay before jitter: `min(max_delay, base * decay^attempt)`.
///
/// `attempt` is zero-based (0 for the first reconnect). The sequence is
/// non-decreasing in `attempt` and saturates at `max_delay_ms`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn base_delay(config: &BackoffConfig, attempt: u32) -> u64 {
    let exponential = (config.base_delay_ms as f64) * config.decay.powi(attempt.min(64) as i32);
    if exponential.is_finite() {
        (exponential.round() as u64).min(config.max_delay_ms)
    } else {
        config.max_delay_ms
    }
}

/// Backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG. Jitter maps it
/// to a multiplier in `[1 - jitter, 1 + jitter)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn delay_with_random(config: &BackoffConfig, attempt: u32, random: f64) -> u64 {
    let capped = base_delay(config, attempt);
    let jitter = 1.0 + (random * 2.0 - 1.0) * config.jitter_factor;
    let with_jitter = (capped as f64) * jitter;
    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_attempt_uses_base_delay() {
        let config = BackoffConfig::default();
        assert_eq!(base_delay(&config, 0), 500);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let config = BackoffConfig::default();
        assert_eq!(base_delay(&config, 1), 1000);
        assert_eq!(base_delay(&config, 2), 2000);
        assert_eq!(base_delay(&config, 3), 4000);
    }

    #[test]
    fn delay_caps_at_max() {
        let config = BackoffConfig::default();
        assert_eq!(base_delay(&config, 10), 30_000);
        assert_eq!(base_delay(&config, 63), 30_000);
    }

    #[test]
    fn jitter_is_symmetric() {
        let config = BackoffConfig::default();
        // random = 0.5 is the midpoint: no jitter applied
        assert_eq!(delay_with_random(&config, 0, 0.5), 500);
        // random = 0.0 is the lower bound: -20%
        assert_eq!(delay_with_random(&config, 0, 0.0), 400);
        // random → 1.0 approaches the upper bound: +20%
        assert_eq!(delay_with_random(&config, 0, 0.999_999), 600);
    }

    #[test]
    fn zero_jitter_factor_is_deterministic() {
        let config = BackoffConfig {
            jitter_factor: 0.0,
            ..BackoffConfig::default()
        };
        assert_eq!(delay_with_random(&config, 2, 0.0), 2000);
        assert_eq!(delay_with_random(&config, 2, 0.99), 2000);
    }

    #[test]
    fn fractional_decay_supported() {
        let config = BackoffConfig {
            base_delay_ms: 1000,
            decay: 1.5,
            ..BackoffConfig::default()
        };
        assert_eq!(base_delay(&config, 1), 1500);
        assert_eq!(base_delay(&config, 2), 2250);
    }

    proptest! {
        #[test]
        fn base_sequence_is_non_decreasing(attempt in 0u32..40) {
            let config = BackoffConfig::default();
            prop_assert!(base_delay(&config, attempt) <= base_delay(&config, attempt + 1));
        }

        #[test]
        fn jittered_delay_stays_within_bounds(
            attempt in 0u32..40,
            random in 0.0f64..1.0,
        ) {
            let config = BackoffConfig::default();
            let base = base_delay(&config, attempt);
            let jittered = delay_with_random(&config, attempt, random);
            let lower = ((base as f64) * 0.8).floor() as u64;
            let upper = ((base as f64) * 1.2).ceil() as u64;
            prop_assert!(jittered >= lower && jittered <= upper);
        }
    }
}
