//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use parley_core::LogFormat;
use parley_settings::ParleySettings;

/// Parley coordination engine.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Parley coordination engine")]
pub struct Cli {
    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Settings file to load instead of `~/.parley/settings.json`.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// What to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the idle watchdog until Ctrl-C.
    Watchdog {
        /// Sweep interval in milliseconds (overrides settings).
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Run one watchdog sweep and print the report.
    Sweep,
    /// Print a conversation snapshot.
    Snapshot {
        /// Conversation id.
        conversation: i64,
    },
    /// Print the current guidance for a conversation.
    Guidance {
        /// Conversation id.
        conversation: i64,
    },
    /// Apply pending schema migrations.
    Migrate,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    pub fn apply_to(&self, settings: &mut ParleySettings) {
        if let Some(ref path) = self.db_path {
            settings.database.path = path.to_string_lossy().into_owned();
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
        if let Command::Watchdog {
            interval_ms: Some(ms),
        } = self.command
        {
            settings.watchdog.interval_ms = ms;
        }
    }
}
