//! # pulse-settings
//!
//! Configuration management with layered sources for the pulse messaging
//! client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`PulseSettings::default()`]
//! 2. **User file** — `~/.pulse/settings.json` (merged over defaults)
//! 3. **Environment variables** — `PULSE_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use pulse_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("queue capacity: {}", settings.queue.capacity);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
///
/// Initialized on first access via [`get_settings`]. Components never read
/// this directly — the `MessagingClient` snapshots settings at construction
/// so tests and embedders can pass their own.
static SETTINGS: OnceLock<PulseSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.pulse/settings.json` with env var
/// overrides. On subsequent calls, returns the cached value. If loading
/// fails, returns compiled defaults.
pub fn get_settings() -> &'static PulseSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
pub fn init_settings(settings: PulseSettings) -> std::result::Result<(), PulseSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
