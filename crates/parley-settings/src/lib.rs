//! # parley-settings
//!
//! Layered configuration for the Parley engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`ParleySettings::default()`])
//! 2. **User file** `~/.parley/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** `PARLEY_*` overrides (highest priority)
//!
//! Per-conversation overrides (`maxTurns`, `idleTimeoutMs`,
//! `disableIdleTimeout`) live in conversation metadata, not here.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, parley_home, resolve_db_path,
    settings_path,
};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<ParleySettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.parley/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static ParleySettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            ParleySettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ParleySettings) -> std::result::Result<(), ParleySettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = ParleySettings::default();
        let _path = settings_path();
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }

    #[test]
    fn installed_settings_are_returned_by_accessor() {
        let mut custom = ParleySettings::default();
        custom.watchdog.max_cancellations_per_run = 3;
        assert!(init_settings(custom).is_ok());
        assert_eq!(get_settings().watchdog.max_cancellations_per_run, 3);

        let rejected = init_settings(ParleySettings::default()).unwrap_err();
        assert_eq!(rejected.watchdog.max_cancellations_per_run, 10);
        assert_eq!(get_settings().watchdog.max_cancellations_per_run, 3);
    }
}
