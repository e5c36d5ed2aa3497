//! Settings loading with layered sources and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If `~/.pulse/settings.json` exists, merge user values over defaults
//!    (figment merges objects recursively; arrays and primitives are
//!    replaced entirely)
//! 3. Apply environment variable overrides (highest priority)
//!
//! Env vars have strict parsing rules: integers must be valid and within
//! the documented range, booleans accept `true`/`1`/`yes`/`on` and
//! `false`/`0`/`no`/`off`, and invalid values are logged and ignored.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Format, Json, Serialized};
use tracing::debug;

use crate::errors::Result;
use crate::types::PulseSettings;

/// Resolve the path to the settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let mut figment = Figment::from(Serialized::defaults(PulseSettings::default()));
    if path.exists() {
        debug!(?path, "loading settings from file");
        figment = figment.merge(Json::file_exact(path));
    } else {
        debug!(?path, "settings file not found, using defaults");
    }
    let mut settings: PulseSettings = figment.extract()?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Apply environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    // ── Connection / backoff ────────────────────────────────────────
    if let Some(v) = read_env_u32("PULSE_MAX_RECONNECT_ATTEMPTS", 1, 1000) {
        settings.connection.backoff.max_attempts = v;
    }
    if let Some(v) = read_env_u64("PULSE_RECONNECT_BASE_DELAY_MS", 1, 600_000) {
        settings.connection.backoff.base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("PULSE_RECONNECT_MAX_DELAY_MS", 1, 3_600_000) {
        settings.connection.backoff.max_delay_ms = v;
    }
    if let Some(v) = read_env_u64("PULSE_REQUEST_TIMEOUT_MS", 10, 600_000) {
        settings.connection.request_timeout_ms = v;
    }
    if let Some(v) = read_env_u32("PULSE_REQUEST_RETRIES", 0, 100) {
        settings.connection.request_retries = v;
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = read_env_bool("PULSE_HEARTBEAT_ENABLED") {
        settings.heartbeat.enabled = v;
    }
    if let Some(v) = read_env_u64("PULSE_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.heartbeat.interval_ms = v;
    }
    if let Some(v) = read_env_u32("PULSE_HEARTBEAT_MAX_MISSED", 1, 100) {
        settings.heartbeat.max_missed = v;
    }

    // ── Queue / rate limit ──────────────────────────────────────────
    if let Some(v) = read_env_usize("PULSE_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.queue.capacity = v;
    }
    if let Some(v) = read_env_u64("PULSE_QUEUE_TTL_MS", 1, 86_400_000) {
        settings.queue.default_ttl_ms = v;
    }
    if let Some(v) = read_env_u32("PULSE_RATE_CAPACITY", 1, 1_000_000) {
        settings.rate_limit.capacity = v;
    }
    if let Some(v) = read_env_f64("PULSE_RATE_REFILL_PER_SEC", 0.001, 1_000_000.0) {
        settings.rate_limit.refill_per_sec = v;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Env parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = val.parse::<u32>().ok().filter(|v| (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = val.parse::<u64>().ok().filter(|v| (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = val
        .parse::<usize>()
        .ok()
        .filter(|v| (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = val
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= min && *v <= max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
