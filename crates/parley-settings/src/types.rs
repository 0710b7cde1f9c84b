//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use parley_core::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Event log storage.
    pub database: DatabaseSettings,
    /// Append/guidance behavior.
    pub orchestrator: OrchestratorSettings,
    /// Stalled-conversation sweep.
    pub watchdog: WatchdogSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ParleySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: parley_core::constants::NAME.to_string(),
            database: DatabaseSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            watchdog: WatchdogSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ParleySettings {
    /// Reject combinations that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "database.poolSize must be at least 1".into(),
            ));
        }
        if self.orchestrator.default_max_turns == 0 {
            return Err(SettingsError::InvalidValue(
                "orchestrator.defaultMaxTurns must be at least 1".into(),
            ));
        }
        if self.watchdog.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "watchdog.intervalMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// `SQLite` storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file. Relative paths resolve under `~/.parley`; `:memory:`
    /// opens a private in-memory database.
    pub path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `busy_timeout` pragma in milliseconds.
    pub busy_timeout_ms: u64,
    /// `cache_size` pragma in KiB.
    pub cache_size_kb: i64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "parley.db".to_string(),
            pool_size: 4,
            busy_timeout_ms: 5_000,
            cache_size_kb: 64_000,
        }
    }
}

impl DatabaseSettings {
    /// Whether the configured path names an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

/// Orchestrator behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Turn ceiling when a conversation does not set `maxTurns`.
    pub default_max_turns: u32,
    /// Action deadline attached to emitted guidance.
    pub guidance_deadline_ms: u64,
    /// Lifetime of a turn claim.
    pub claim_ttl_ms: u64,
    /// Default timeout for `wait_for_turn` / `wait_for_updates`.
    pub wait_timeout_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_max_turns: 100,
            guidance_deadline_ms: 30_000,
            claim_ttl_ms: 30_000,
            wait_timeout_ms: 30_000,
        }
    }
}

/// Watchdog sweep settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchdogSettings {
    /// Whether binaries start the watchdog loop.
    pub enabled: bool,
    /// Sweep interval.
    pub interval_ms: u64,
    /// Conversations younger than this are never reclaimed.
    pub min_age_ms: u64,
    /// Inactivity window when a conversation sets no `idleTimeoutMs`.
    pub stall_threshold_ms: u64,
    /// Maximum conversations canceled per sweep.
    pub max_cancellations_per_run: usize,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            min_age_ms: 60_000,
            stall_threshold_ms: 600_000,
            max_cancellations_per_run: 10,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
