//! # parley
//!
//! Operational binary: runs the idle watchdog, one-off sweeps, migrations,
//! and prints conversation state as JSON.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use parley::cli::{Cli, Command};
use parley::commands;
use parley_settings::ParleySettings;

fn load_settings(cli: &Cli) -> Result<ParleySettings> {
    let mut settings = match cli.settings {
        Some(ref path) => parley_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?,
        None => parley_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply_to(&mut settings);
    Ok(settings)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings first: they carry the log level and format.
    let loaded = load_settings(&cli)?;
    let already_set = parley_settings::init_settings(loaded).is_err();
    let settings = parley_settings::get_settings();
    parley_core::logging::init_subscriber_with_format(
        &settings.logging.level,
        settings.logging.format,
    );
    if already_set {
        tracing::debug!("global settings already initialized");
    }

    match cli.command {
        Command::Migrate => {
            let version = commands::migrate(settings)?;
            println!("schema version {version}");
        }
        Command::Snapshot { conversation } => {
            let orchestrator = commands::build_orchestrator(settings)?;
            print_json(&commands::snapshot(&orchestrator, conversation)?)?;
        }
        Command::Guidance { conversation } => {
            let orchestrator = commands::build_orchestrator(settings)?;
            print_json(&commands::guidance(&orchestrator, conversation)?)?;
        }
        Command::Sweep => {
            let orchestrator = commands::build_orchestrator(settings)?;
            print_json(&commands::sweep(orchestrator, settings)?)?;
        }
        Command::Watchdog { .. } => {
            let orchestrator = commands::build_orchestrator(settings)?;
            tracing::info!(path = %settings.database.path, "Parley watchdog running");
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "Failed to listen for ctrl-c");
                }
            };
            let stats = commands::run_watchdog(orchestrator, settings, shutdown).await?;
            tracing::info!(%stats, "Shutdown complete");
        }
    }
    Ok(())
}
