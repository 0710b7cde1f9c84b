//! Stalled-conversation watchdog.
//!
//! A sweep lists active conversations and cancels the ones nobody has moved
//! forward for too long. Sweeps never overlap: a tick that finds the previous
//! sweep still running is skipped, not queued. Each sweep also purges expired
//! turn claims.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::{ConversationStatus, time as ptime};
use parley_events::ConversationRow;
use parley_settings::WatchdogSettings;

use crate::errors::{Result, RuntimeError};
use crate::orchestrator::Orchestrator;

/// Errors kept in [`WatchdogStats::last_errors`].
const MAX_KEPT_ERRORS: usize = 20;

/// Result of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Another sweep was running; nothing was examined.
    pub skipped: bool,
    /// Active conversations examined.
    pub examined: usize,
    /// Conversations canceled this sweep.
    pub canceled: Vec<i64>,
    /// Stalled conversations left for a later sweep because of the cap.
    pub deferred: usize,
    /// Conversations whose cancellation failed.
    pub failed: Vec<i64>,
    /// Expired turn claims deleted.
    pub claims_purged: usize,
}

/// Cumulative counters across sweeps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogStats {
    /// Completed sweeps.
    pub runs: u64,
    /// Ticks skipped because a sweep was in progress.
    pub skipped: u64,
    /// Conversations canceled.
    pub canceled: u64,
    /// Cancellation or listing failures.
    pub failures: u64,
    /// Most recent failures, oldest first.
    pub last_errors: Vec<String>,
    /// When the last sweep finished.
    pub last_run_at: Option<String>,
}

impl WatchdogStats {
    fn record_error(&mut self, message: String) {
        self.failures += 1;
        self.last_errors.push(message);
        if self.last_errors.len() > MAX_KEPT_ERRORS {
            let excess = self.last_errors.len() - MAX_KEPT_ERRORS;
            let _ = self.last_errors.drain(..excess);
        }
    }
}

/// Clears the running flag when a sweep ends, even on early return.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic reclamation of abandoned conversations.
pub struct Watchdog {
    orchestrator: Arc<Orchestrator>,
    settings: WatchdogSettings,
    running: AtomicBool,
    stats: Mutex<WatchdogStats>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// Create a stopped watchdog.
    pub fn new(orchestrator: Arc<Orchestrator>, settings: WatchdogSettings) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            settings,
            running: AtomicBool::new(false),
            stats: Mutex::new(WatchdogStats::default()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Start sweeping every `interval`. The first sweep runs one interval
    /// after start. Calling `start` twice keeps the first loop.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = this.run_once();
                        if !report.canceled.is_empty() || !report.failed.is_empty() {
                            info!(
                                canceled = report.canceled.len(),
                                failed = report.failed.len(),
                                deferred = report.deferred,
                                "watchdog sweep"
                            );
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
            debug!("watchdog loop stopped");
        }));
        info!(?interval, "watchdog started");
        true
    }

    /// Start with the configured interval. Does nothing when the watchdog
    /// is disabled in settings.
    pub fn start_default(self: &Arc<Self>) -> bool {
        if !self.settings.enabled {
            debug!("watchdog disabled");
            return false;
        }
        self.start(Duration::from_millis(self.settings.interval_ms))
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "watchdog task ended abnormally");
            }
        }
    }

    /// Snapshot of the cumulative counters.
    pub fn stats(&self) -> WatchdogStats {
        self.stats.lock().clone()
    }

    /// Sweep now.
    pub fn run_once(&self) -> SweepReport {
        self.run_once_at(Utc::now())
    }

    /// Sweep as if the current time were `now`.
    pub fn run_once_at(&self, now: DateTime<Utc>) -> SweepReport {
        if self.running.swap(true, Ordering::AcqRel) {
            self.stats.lock().skipped += 1;
            return SweepReport {
                skipped: true,
                ..SweepReport::default()
            };
        }
        let _guard = RunningGuard(&self.running);

        let mut report = SweepReport::default();
        match self.orchestrator.list_conversations(Some(ConversationStatus::Active)) {
            Ok(conversations) => self.sweep(&conversations, now, &mut report),
            Err(err) => {
                warn!(error = %err, "watchdog could not list conversations");
                self.stats.lock().record_error(format!("list: {err}"));
            }
        }

        match self.orchestrator.purge_expired_claims(&ptime::format(now)) {
            Ok(purged) => report.claims_purged = purged,
            Err(err) => {
                warn!(error = %err, "watchdog could not purge claims");
                self.stats.lock().record_error(format!("claims: {err}"));
            }
        }

        let mut stats = self.stats.lock();
        stats.runs += 1;
        stats.canceled += report.canceled.len() as u64;
        stats.last_run_at = Some(ptime::format(now));
        report
    }

    fn sweep(&self, conversations: &[ConversationRow], now: DateTime<Utc>, report: &mut SweepReport) {
        let cap = self.settings.max_cancellations_per_run;
        for conv in conversations {
            report.examined += 1;
            let idle_ms = match self.idle_ms(conv, now) {
                Ok(Some(idle_ms)) => idle_ms,
                Ok(None) => continue,
                Err(err) => {
                    warn!(conversation = conv.id, error = %err, "stall check failed");
                    report.failed.push(conv.id);
                    self.stats
                        .lock()
                        .record_error(format!("conversation {}: {err}", conv.id));
                    continue;
                }
            };

            if report.canceled.len() >= cap {
                report.deferred += 1;
                continue;
            }

            match self.orchestrator.cancel_idle(conv.id, idle_ms) {
                Ok(_) => {
                    info!(conversation = conv.id, idle_ms, "stalled conversation canceled");
                    report.canceled.push(conv.id);
                }
                // Closed by a writer after the listing.
                Err(RuntimeError::ConversationFinalized(_)) => {
                    debug!(conversation = conv.id, "already completed, skipped");
                }
                Err(err) => {
                    warn!(conversation = conv.id, error = %err, "cancel failed");
                    report.failed.push(conv.id);
                    self.stats
                        .lock()
                        .record_error(format!("conversation {}: {err}", conv.id));
                }
            }
        }
    }

    /// Milliseconds since the last closing event when the conversation is
    /// stalled, `None` otherwise.
    fn idle_ms(&self, conv: &ConversationRow, now: DateTime<Utc>) -> Result<Option<u64>> {
        let config = &conv.metadata.config;
        if config.disable_idle_timeout {
            return Ok(None);
        }
        let Some(created) = ptime::parse(&conv.created_at) else {
            return Ok(None);
        };
        if ptime::elapsed_ms(created, now) <= self.settings.min_age_ms {
            return Ok(None);
        }

        let threshold = config
            .idle_timeout_ms
            .unwrap_or(self.settings.stall_threshold_ms);
        let last_activity = self
            .orchestrator
            .store()
            .last_closing_event(conv.id)?
            .and_then(|row| ptime::parse(&row.ts))
            .unwrap_or(created);
        let idle = ptime::elapsed_ms(last_activity, now);
        Ok((idle > threshold).then_some(idle))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
