//! Orchestrator: validates writes, appends them, fans them out, and decides
//! what happens after a turn closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use parley_core::constants::{
    CLIENT_REQUEST_ID_KEY, IDLE_TIMEOUT_KIND, META_CREATED_KIND, OUTCOME_KEY, SYSTEM_AGENT_ID,
};
use parley_core::{
    ConversationMeta, ConversationStatus, Finality, Guidance, GuidanceKind, Outcome,
    OutcomeStatus, Participant, Scenario, time,
};
use parley_events::{
    AppendEvent, AppendResult, AttachmentRow, ConversationRow, EventRow, EventStore, Head,
    TurnClaimRow,
};
use parley_settings::OrchestratorSettings;

use crate::bus::SubscriptionBus;
use crate::errors::{Result, RuntimeError};
use crate::orchestrator::executors::{ExecutorRegistry, LiveExecutor};
use crate::policy::PolicySet;
use crate::types::{ConversationSnapshot, EndOptions};

/// Coordination façade over one event store.
pub struct Orchestrator {
    pub(crate) store: Arc<EventStore>,
    pub(crate) bus: Arc<SubscriptionBus>,
    pub(crate) settings: OrchestratorSettings,
    pub(crate) policies: PolicySet,
    executors: ExecutorRegistry,
    shutting_down: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator with the default policy set.
    pub fn new(store: Arc<EventStore>, settings: OrchestratorSettings) -> Self {
        Self {
            store,
            bus: Arc::new(SubscriptionBus::new()),
            settings,
            policies: PolicySet::default(),
            executors: ExecutorRegistry::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Replace the policy table.
    #[must_use]
    pub fn with_policies(mut self, policies: PolicySet) -> Self {
        self.policies = policies;
        self
    }

    /// Underlying event store.
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Subscription bus.
    pub fn bus(&self) -> &Arc<SubscriptionBus> {
        &self.bus
    }

    /// Orchestrator settings in effect.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────

    /// Append through the log, publish the persisted row, then run post-write
    /// orchestration. Idempotent replays return the original result and are
    /// not published again.
    #[instrument(skip(self, input), fields(
        conversation = input.conversation,
        agent_id = %input.agent_id,
        event_type = %input.event_type,
    ))]
    pub fn append_event(&self, input: &AppendEvent) -> Result<AppendResult> {
        self.ensure_running()?;
        let appended = self.store.append(input)?;
        if appended.replayed {
            debug!(seq = appended.row.seq, "replayed, not republished");
            return Ok(appended.result());
        }

        let delivered = self.bus.publish(&appended.row);
        debug!(seq = appended.row.seq, delivered, "event published");
        self.after_commit(&appended.row);
        Ok(appended.result())
    }

    /// Append a message after checking `turn` against the current head.
    /// A conversation-closing payload gets `outcome.status = completed`
    /// unless it names one.
    pub fn send_message(
        &self,
        conversation: i64,
        turn: i64,
        agent_id: &str,
        payload: Value,
        finality: Finality,
    ) -> Result<AppendResult> {
        self.precheck_turn(conversation, turn, &payload)?;
        let payload = if finality == Finality::Conversation {
            normalize_outcome(payload)
        } else {
            payload
        };
        self.append_event(
            &AppendEvent::message(conversation, agent_id, payload)
                .in_turn(turn)
                .with_finality(finality),
        )
    }

    /// Append a trace after checking `turn` against the current head.
    pub fn send_trace(
        &self,
        conversation: i64,
        turn: i64,
        agent_id: &str,
        payload: Value,
    ) -> Result<AppendResult> {
        self.precheck_turn(conversation, turn, &payload)?;
        self.append_event(&AppendEvent::trace(conversation, agent_id, payload).in_turn(turn))
    }

    /// Create a conversation, record `meta_created`, and announce the
    /// starting agent if one is configured.
    #[instrument(skip(self, meta), fields(scenario = ?meta.scenario_id))]
    pub fn create_conversation(&self, meta: ConversationMeta) -> Result<ConversationRow> {
        self.ensure_running()?;
        let meta = self.validate_meta(meta)?;
        let row = self.store.create_conversation(&meta)?;

        let created = self.append_event(&AppendEvent::system(
            row.id,
            SYSTEM_AGENT_ID,
            json!({ "kind": META_CREATED_KIND, "metadata": meta }),
        ))?;

        if let Some(starter) = &meta.starting_agent_id {
            let guidance = Guidance {
                conversation: row.id,
                next_agent_id: starter.clone(),
                kind: GuidanceKind::StartTurn,
                turn: 1,
                seq: Guidance::seq_after(created.seq),
                deadline: self.deadline(),
                note: None,
            };
            let _ = self.bus.publish_guidance(&guidance);
        }

        info!(conversation = row.id, agents = meta.agents.len(), "conversation created");
        Ok(row)
    }

    /// Close a conversation with a structured outcome.
    #[instrument(skip(self, opts), fields(status = %opts.status))]
    pub fn end_conversation(&self, conversation: i64, opts: EndOptions) -> Result<AppendResult> {
        let row = self
            .store
            .get_conversation(conversation)?
            .ok_or(RuntimeError::ConversationNotFound(conversation))?;
        if row.status == ConversationStatus::Completed {
            return Err(RuntimeError::ConversationFinalized(conversation));
        }

        let turn = writable_turn(&self.store.get_head(conversation)?);
        let outcome = Outcome {
            status: opts.status,
            reason: opts.reason,
        };
        let mut payload = json!({ OUTCOME_KEY: outcome });
        if let Some(text) = opts.text {
            payload["text"] = Value::String(text);
        }
        let author = opts.agent_id.unwrap_or_else(|| SYSTEM_AGENT_ID.to_string());

        self.append_event(
            &AppendEvent::message(conversation, &author, payload)
                .in_turn(turn)
                .with_finality(Finality::Conversation),
        )
    }

    /// Reclaim an abandoned conversation: stop its executors, record
    /// `idle_timeout` in the system lane, then close it as canceled.
    pub fn cancel_idle(&self, conversation: i64, idle_ms: u64) -> Result<AppendResult> {
        let stopped = self.executors.stop_all(conversation, Outcome::IDLE_TIMEOUT);
        let _ = self.append_event(&AppendEvent::system(
            conversation,
            SYSTEM_AGENT_ID,
            json!({
                "kind": IDLE_TIMEOUT_KIND,
                "idleMs": idle_ms,
                "stoppedExecutors": stopped,
            }),
        ))?;
        self.end_conversation(
            conversation,
            EndOptions::with_status(OutcomeStatus::Canceled).reason(Outcome::IDLE_TIMEOUT),
        )
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Conversation row, events, last closed seq and bound scenario.
    pub fn get_conversation_snapshot(&self, conversation: i64) -> Result<ConversationSnapshot> {
        let row = self
            .store
            .get_conversation(conversation)?
            .ok_or(RuntimeError::ConversationNotFound(conversation))?;
        let events = self.store.get_events(conversation)?;
        let head = self.store.get_head(conversation)?;
        let scenario = match &row.metadata.scenario_id {
            Some(id) => self.store.get_scenario(id)?,
            None => None,
        };
        Ok(ConversationSnapshot::new(
            row,
            events,
            head.last_closed_seq,
            scenario,
        ))
    }

    /// One conversation row.
    pub fn get_conversation(&self, conversation: i64) -> Result<Option<ConversationRow>> {
        Ok(self.store.get_conversation(conversation)?)
    }

    /// Conversations, newest first, optionally filtered by status.
    pub fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationRow>> {
        Ok(self.store.list_conversations(status)?)
    }

    /// Events with `seq > since`.
    pub fn get_events_since(&self, conversation: i64, since: i64) -> Result<Vec<EventRow>> {
        Ok(self.store.get_events_since(conversation, since)?)
    }

    /// At most `limit` events with `seq > after`.
    pub fn get_events_page(
        &self,
        conversation: i64,
        after: i64,
        limit: u32,
    ) -> Result<Vec<EventRow>> {
        Ok(self.store.get_events_page(conversation, after, limit)?)
    }

    /// Current head of a conversation.
    pub fn get_head(&self, conversation: i64) -> Result<Head> {
        Ok(self.store.get_head(conversation)?)
    }

    /// Attachment by id.
    pub fn get_attachment(&self, id: &str) -> Result<Option<AttachmentRow>> {
        Ok(self.store.get_attachment(id)?)
    }

    /// Latest attachment with the given `docId` in a conversation.
    pub fn get_attachment_by_doc_id(
        &self,
        conversation: i64,
        doc_id: &str,
    ) -> Result<Option<AttachmentRow>> {
        Ok(self.store.get_attachment_by_doc_id(conversation, doc_id)?)
    }

    /// Every attachment of a conversation.
    pub fn list_attachments(&self, conversation: i64) -> Result<Vec<AttachmentRow>> {
        Ok(self.store.list_attachments(conversation)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scenarios
    // ─────────────────────────────────────────────────────────────────────

    /// Store or replace a scenario definition.
    pub fn register_scenario(&self, scenario: &Scenario) -> Result<()> {
        if scenario.id.trim().is_empty() {
            return Err(RuntimeError::Config("scenario id must not be empty".into()));
        }
        let ids = scenario.agent_ids();
        if let Some(dup) = first_duplicate(&ids) {
            return Err(RuntimeError::Config(format!(
                "scenario {} lists agent {dup} twice",
                scenario.id
            )));
        }
        self.store.upsert_scenario(scenario)?;
        debug!(scenario = %scenario.id, agents = ids.len(), "scenario registered");
        Ok(())
    }

    /// Scenario by id.
    pub fn get_scenario(&self, id: &str) -> Result<Scenario> {
        self.store
            .get_scenario(id)?
            .ok_or_else(|| RuntimeError::ScenarioNotFound(id.to_string()))
    }

    /// Every registered scenario.
    pub fn list_scenarios(&self) -> Result<Vec<Scenario>> {
        Ok(self.store.list_scenarios()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Turn claims
    // ─────────────────────────────────────────────────────────────────────

    /// Race for the guidance at `guidance_seq`. `false` means someone else
    /// already holds it; retrying the same key will not change that.
    pub fn claim_turn(&self, conversation: i64, guidance_seq: f64, agent_id: &str) -> Result<bool> {
        let expires_at = time::after_ms(Utc::now(), self.settings.claim_ttl_ms);
        Ok(self
            .store
            .claim_turn(conversation, guidance_seq, agent_id, &expires_at)?)
    }

    /// Unexpired claims of a conversation.
    pub fn active_claims(&self, conversation: i64) -> Result<Vec<TurnClaimRow>> {
        Ok(self.store.active_claims(conversation)?)
    }

    /// Delete claims that expired at or before `now`.
    pub fn purge_expired_claims(&self, now: &str) -> Result<usize> {
        Ok(self.store.delete_expired_claims(now)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Executors
    // ─────────────────────────────────────────────────────────────────────

    /// Attach a live executor to a conversation.
    pub fn attach_executor(&self, conversation: i64, executor: Arc<dyn LiveExecutor>) {
        self.executors.attach(conversation, executor);
    }

    /// Detach without stopping.
    pub fn detach_executor(&self, conversation: i64, agent_id: &str) -> bool {
        self.executors.detach(conversation, agent_id)
    }

    /// Executors currently attached to a conversation.
    pub fn executor_count(&self, conversation: i64) -> usize {
        self.executors.count(conversation)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Reject new writes and stop bus fan-out. In-flight calls finish.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            self.bus.close();
            info!("orchestrator shutting down");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(RuntimeError::ShuttingDown);
        }
        Ok(())
    }

    pub(crate) fn deadline(&self) -> String {
        time::after_ms(Utc::now(), self.settings.guidance_deadline_ms)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Post-write
    // ─────────────────────────────────────────────────────────────────────

    fn after_commit(&self, row: &EventRow) {
        if row.closes_conversation() {
            let _ = self.executors.stop_all(row.conversation, "conversation completed");
            return;
        }
        if !row.closes_turn() {
            return;
        }
        match self.enforce_max_turns(row) {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => warn!(
                conversation = row.conversation,
                error = %err,
                "turn ceiling check failed"
            ),
        }
        self.emit_guidance_after(row);
    }

    fn enforce_max_turns(&self, row: &EventRow) -> Result<bool> {
        let conversation = row.conversation;
        let Some(conv) = self.store.get_conversation(conversation)? else {
            return Ok(false);
        };
        let ceiling = conv
            .metadata
            .config
            .max_turns
            .unwrap_or(self.settings.default_max_turns);
        let closed = self.store.count_closed_turns(conversation)?;
        if closed < i64::from(ceiling) {
            return Ok(false);
        }

        info!(conversation, closed, ceiling, "turn ceiling reached, closing conversation");
        let turn = writable_turn(&self.store.get_head(conversation)?);
        let payload = json!({
            "text": format!("Conversation reached its limit of {ceiling} turns."),
            OUTCOME_KEY: Outcome::new(OutcomeStatus::Completed, Outcome::MAX_TURNS),
        });
        let _ = self.append_event(
            &AppendEvent::message(conversation, SYSTEM_AGENT_ID, payload)
                .in_turn(turn)
                .with_finality(Finality::Conversation),
        )?;
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────

    fn precheck_turn(&self, conversation: i64, turn: i64, payload: &Value) -> Result<()> {
        match self.check_turn(conversation, turn) {
            // A retry of an already-committed request is answered by the
            // idempotency index, which runs before the log's turn checks.
            Err(err) if payload.get(CLIENT_REQUEST_ID_KEY).is_some() => {
                debug!(conversation, turn, error = %err, "precheck failed, deferring to idempotency");
                Ok(())
            }
            other => other,
        }
    }

    fn check_turn(&self, conversation: i64, turn: i64) -> Result<()> {
        if let Some(row) = self.store.get_conversation(conversation)? {
            if row.status == ConversationStatus::Completed {
                return Err(RuntimeError::ConversationFinalized(conversation));
            }
        }
        if turn < 1 {
            return Err(RuntimeError::InvalidTurnNumber {
                conversation,
                reason: format!("turn {turn} is not a conversation turn"),
            });
        }

        let expected = writable_turn(&self.store.get_head(conversation)?);
        if turn == expected {
            Ok(())
        } else if turn < expected {
            Err(RuntimeError::TurnAlreadyFinalized { conversation, turn })
        } else {
            Err(RuntimeError::TurnNotOpen {
                conversation,
                turn,
                expected,
            })
        }
    }

    fn validate_meta(&self, mut meta: ConversationMeta) -> Result<ConversationMeta> {
        if let Some(scenario_id) = meta.scenario_id.clone() {
            let scenario = self
                .store
                .get_scenario(&scenario_id)?
                .ok_or_else(|| RuntimeError::Config(format!("unknown scenario {scenario_id}")))?;

            if meta.agents.is_empty() {
                meta.agents = scenario
                    .agents
                    .iter()
                    .map(|a| Participant {
                        id: a.agent_id.clone(),
                        kind: a.kind,
                        class: a.role.clone(),
                    })
                    .collect();
            }

            let ids = meta.participant_ids();
            let mismatch = scenario.roster_mismatch(&ids);
            if !mismatch.is_empty() {
                return Err(RuntimeError::Config(format!(
                    "participants do not match scenario {scenario_id}: {}",
                    mismatch.join(", ")
                )));
            }
        }

        let ids = meta.participant_ids();
        if let Some(dup) = first_duplicate(&ids) {
            return Err(RuntimeError::Config(format!("participant {dup} listed twice")));
        }
        if let Some(starter) = &meta.starting_agent_id {
            if meta.participant(starter).is_none() {
                return Err(RuntimeError::Config(format!(
                    "starting agent {starter} is not a participant"
                )));
            }
        }
        Ok(meta)
    }
}

/// Turn that accepts the next non-system write: the open turn, or the one
/// after the last closed turn.
pub fn writable_turn(head: &Head) -> i64 {
    if head.has_open_turn {
        head.last_turn
    } else {
        head.last_turn + 1
    }
}

fn normalize_outcome(mut payload: Value) -> Value {
    if let Some(obj) = payload.as_object_mut() {
        let outcome = obj
            .entry(OUTCOME_KEY)
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(outcome) = outcome.as_object_mut() {
            let _ = outcome
                .entry("status")
                .or_insert_with(|| Value::String(OutcomeStatus::Completed.as_str().into()));
        }
    }
    payload
}

fn first_duplicate<'a>(ids: &[&'a str]) -> Option<&'a str> {
    for (i, id) in ids.iter().enumerate() {
        if ids[..i].contains(id) {
            return Some(id);
        }
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
