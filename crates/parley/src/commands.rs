//! Commands run by the `parley` binary.
//!
//! Each command works against an [`Orchestrator`] built from settings, and
//! the read-only ones return JSON so the binary only has to print.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::info;

use parley_events::EventStore;
use parley_runtime::{Orchestrator, Watchdog};
use parley_settings::ParleySettings;

/// Open the configured database (applying migrations) and wrap it.
pub fn build_orchestrator(settings: &ParleySettings) -> Result<Arc<Orchestrator>> {
    let store = EventStore::open(&settings.database).with_context(|| {
        format!("Failed to open database: {}", settings.database.path)
    })?;
    Ok(Arc::new(Orchestrator::new(
        Arc::new(store),
        settings.orchestrator.clone(),
    )))
}

/// Apply migrations and report the resulting schema version.
pub fn migrate(settings: &ParleySettings) -> Result<u32> {
    let orchestrator = build_orchestrator(settings)?;
    let version = orchestrator
        .store()
        .schema_version()
        .context("Failed to read schema version")?;
    info!(version, path = %settings.database.path, "schema up to date");
    Ok(version)
}

/// Snapshot of one conversation as JSON.
pub fn snapshot(orchestrator: &Orchestrator, conversation: i64) -> Result<Value> {
    let snapshot = orchestrator
        .get_conversation_snapshot(conversation)
        .with_context(|| format!("Failed to load conversation {conversation}"))?;
    Ok(serde_json::to_value(snapshot)?)
}

/// Current guidance as JSON, `null` when nobody is scheduled.
pub fn guidance(orchestrator: &Orchestrator, conversation: i64) -> Result<Value> {
    let guidance = orchestrator
        .get_guidance_snapshot(conversation)
        .with_context(|| format!("Failed to compute guidance for {conversation}"))?;
    Ok(serde_json::to_value(guidance)?)
}

/// One watchdog sweep; the report as JSON.
pub fn sweep(orchestrator: Arc<Orchestrator>, settings: &ParleySettings) -> Result<Value> {
    let watchdog = Watchdog::new(orchestrator, settings.watchdog.clone());
    let report = watchdog.run_once();
    if report.skipped {
        return Err(anyhow!("Watchdog sweep skipped"));
    }
    Ok(serde_json::to_value(report)?)
}

/// Run the watchdog loop until `shutdown` resolves.
pub async fn run_watchdog<F>(
    orchestrator: Arc<Orchestrator>,
    settings: &ParleySettings,
    shutdown: F,
) -> Result<Value>
where
    F: Future<Output = ()>,
{
    let watchdog = Watchdog::new(Arc::clone(&orchestrator), settings.watchdog.clone());
    if !watchdog.start_default() {
        info!("watchdog disabled in settings");
        return Ok(serde_json::to_value(watchdog.stats())?);
    }

    shutdown.await;

    info!("Shutting down...");
    watchdog.stop().await;
    orchestrator.shutdown();
    Ok(serde_json::to_value(watchdog.stats())?)
}
