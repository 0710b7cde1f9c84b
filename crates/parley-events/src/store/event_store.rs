//! High-level transactional `EventStore` API.
//!
//! Composes the repositories into conversation-centric operations. Every
//! write runs inside a single `SQLite` transaction; `append` takes an
//! IMMEDIATE transaction so concurrent writers queue on the write lock and
//! all invariant checks see a stable log.

use rusqlite::TransactionBehavior;
use serde_json::Value;
use tracing::{debug, instrument};

use parley_core::constants::{ATTACHMENTS_KEY, CLIENT_REQUEST_ID_KEY, SYSTEM_TURN};
use parley_core::{ConversationMeta, ConversationStatus, EventType, Finality, Scenario, time};
use parley_settings::DatabaseSettings;

use crate::errors::{EventStoreError, Result};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations;
use crate::sqlite::repositories::attachment::{self, AttachmentRepo, NewAttachment};
use crate::sqlite::repositories::conversation::ConversationRepo;
use crate::sqlite::repositories::event::{EventRepo, NewEvent};
use crate::sqlite::repositories::idempotency::IdempotencyRepo;
use crate::sqlite::repositories::scenario::ScenarioRepo;
use crate::sqlite::repositories::turn_claim::TurnClaimRepo;
use crate::sqlite::row_types::{
    AppendResult, AttachmentRow, ConversationRow, EventRow, Head, TurnClaimRow,
};

/// Input to [`EventStore::append`].
#[derive(Clone, Debug)]
pub struct AppendEvent {
    /// Target conversation (created as a shell if unseen).
    pub conversation: i64,
    /// Kind of entry.
    pub event_type: EventType,
    /// Payload. May carry `clientRequestId` and, for messages, `attachments`.
    pub payload: Value,
    /// Finality (messages only).
    pub finality: Finality,
    /// Author.
    pub agent_id: String,
    /// Explicit turn. Ignored for system events.
    pub turn: Option<i64>,
}

impl AppendEvent {
    fn new(conversation: i64, event_type: EventType, agent_id: &str, payload: Value) -> Self {
        Self {
            conversation,
            event_type,
            payload,
            finality: Finality::None,
            agent_id: agent_id.to_string(),
            turn: None,
        }
    }

    /// A message continuing its turn.
    pub fn message(conversation: i64, agent_id: &str, payload: Value) -> Self {
        Self::new(conversation, EventType::Message, agent_id, payload)
    }

    /// A trace.
    pub fn trace(conversation: i64, agent_id: &str, payload: Value) -> Self {
        Self::new(conversation, EventType::Trace, agent_id, payload)
    }

    /// A system-lane event.
    pub fn system(conversation: i64, agent_id: &str, payload: Value) -> Self {
        Self::new(conversation, EventType::System, agent_id, payload)
    }

    /// Set the explicit turn.
    #[must_use]
    pub fn in_turn(mut self, turn: i64) -> Self {
        self.turn = Some(turn);
        self
    }

    /// Set finality.
    #[must_use]
    pub fn with_finality(mut self, finality: Finality) -> Self {
        self.finality = finality;
        self
    }

    /// `payload.clientRequestId`, if present.
    pub fn client_request_id(&self) -> Option<&str> {
        self.payload.get(CLIENT_REQUEST_ID_KEY).and_then(Value::as_str)
    }
}

/// What [`EventStore::append`] produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Appended {
    /// The persisted row (for replays, the original row).
    pub row: EventRow,
    /// `true` when an idempotency key matched and nothing was written.
    pub replayed: bool,
}

impl Appended {
    /// Commit coordinates.
    pub fn result(&self) -> AppendResult {
        AppendResult::from(&self.row)
    }
}

/// High-level `EventStore` wrapping a connection pool and all repositories.
pub struct EventStore {
    pool: ConnectionPool,
}

impl EventStore {
    /// Wrap an existing pool. Call [`EventStore::migrate`] before use.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open the configured database and apply pending migrations.
    pub fn open(db: &DatabaseSettings) -> Result<Self> {
        let config = ConnectionConfig::from(db);
        let pool = if db.is_memory() {
            connection::new_in_memory(&config)?
        } else {
            connection::new_file(&parley_settings::resolve_db_path(&db.path), &config)?
        };
        let store = Self::new(pool);
        let _ = store.migrate()?;
        Ok(store)
    }

    /// Fresh migrated in-memory store.
    pub fn in_memory() -> Result<Self> {
        let store = Self::new(connection::new_in_memory(&ConnectionConfig::default())?);
        let _ = store.migrate()?;
        Ok(store)
    }

    /// Apply pending migrations, returning how many ran.
    pub fn migrate(&self) -> Result<u32> {
        let conn = self.conn()?;
        migrations::run_migrations(&conn)
    }

    /// Highest applied schema version.
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        migrations::current_version(&conn)
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Append
    // ─────────────────────────────────────────────────────────────────────

    /// Append one event, enforcing every log invariant atomically.
    #[instrument(skip(self, input), fields(
        conversation = input.conversation,
        agent_id = %input.agent_id,
        event_type = %input.event_type,
    ))]
    pub fn append(&self, input: &AppendEvent) -> Result<Appended> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = time::now();
        let conversation = input.conversation;

        let _ = ConversationRepo::ensure(&tx, conversation, &now)?;

        if let Some(request_id) = input.client_request_id() {
            if let Some(seq) = IdempotencyRepo::lookup(&tx, conversation, &input.agent_id, request_id)? {
                let row = EventRepo::by_seq(&tx, conversation, seq)?.ok_or_else(|| {
                    EventStoreError::Internal(format!("idempotency key points at missing seq {seq}"))
                })?;
                debug!(seq, request_id, "idempotent replay");
                return Ok(Appended { row, replayed: true });
            }
        }

        if ConversationRepo::status(&tx, conversation)? == Some(ConversationStatus::Completed) {
            return Err(EventStoreError::ConversationFinalized { conversation });
        }

        if input.event_type != EventType::Message && input.finality != Finality::None {
            return Err(EventStoreError::InvalidFinality {
                event_type: input.event_type,
            });
        }

        let turn = Self::resolve_turn(&tx, input)?;
        let seq = EventRepo::next_seq(&tx, conversation)?;
        let event = EventRepo::next_event_in_turn(&tx, conversation, turn)?;

        EventRepo::insert(
            &tx,
            &NewEvent {
                conversation,
                turn,
                event,
                seq,
                event_type: input.event_type,
                payload: &input.payload,
                finality: input.finality,
                ts: &now,
                agent_id: &input.agent_id,
            },
        )?;

        let mut payload = input.payload.clone();
        if input.event_type == EventType::Message {
            if let Some(rewritten) =
                Self::extract_attachments(&tx, input, turn, event, &now)?
            {
                EventRepo::update_payload(&tx, conversation, seq, &rewritten)?;
                payload = rewritten;
            }
        }

        if let Some(request_id) = input.client_request_id() {
            let _ = IdempotencyRepo::record(&tx, conversation, &input.agent_id, request_id, seq, &now)?;
        }

        if input.finality == Finality::Conversation {
            let _ = ConversationRepo::mark_completed(&tx, conversation)?;
        }

        tx.commit()?;
        debug!(turn, event, seq, finality = %input.finality, "event appended");

        Ok(Appended {
            row: EventRow {
                conversation,
                turn,
                event,
                seq,
                event_type: input.event_type,
                payload,
                finality: input.finality,
                ts: now,
                agent_id: input.agent_id.clone(),
            },
            replayed: false,
        })
    }

    fn resolve_turn(conn: &rusqlite::Connection, input: &AppendEvent) -> Result<i64> {
        let conversation = input.conversation;
        if input.event_type == EventType::System {
            return Ok(SYSTEM_TURN);
        }
        let head = EventRepo::head(conn, conversation)?;
        let invalid = |reason: String| EventStoreError::InvalidTurnNumber {
            conversation,
            reason,
        };

        let Some(turn) = input.turn else {
            if head.last_turn == 0 {
                return Ok(1);
            }
            return Err(invalid(
                "turn is required once the conversation has turns".into(),
            ));
        };

        if turn < 1 {
            return Err(invalid(format!("turn {turn} is not a conversation turn")));
        }
        if turn > head.last_turn + 1 {
            return Err(invalid(format!(
                "turn {turn} skips ahead of last turn {}",
                head.last_turn
            )));
        }
        if turn <= head.last_turn && EventRepo::is_turn_closed(conn, conversation, turn)? {
            return Err(EventStoreError::TurnAlreadyFinalized { conversation, turn });
        }
        if turn == head.last_turn + 1 && head.has_open_turn {
            return Err(invalid(format!(
                "turn {} is still open",
                head.last_turn
            )));
        }
        Ok(turn)
    }

    fn extract_attachments(
        conn: &rusqlite::Connection,
        input: &AppendEvent,
        turn: i64,
        event: i64,
        now: &str,
    ) -> Result<Option<Value>> {
        let Some(entries) = input.payload.get(ATTACHMENTS_KEY) else {
            return Ok(None);
        };
        let Some(entries) = entries.as_array() else {
            return Err(EventStoreError::InvalidAttachment(
                "attachments must be an array".into(),
            ));
        };

        let mut stored_any = false;
        let mut refs = Vec::with_capacity(entries.len());
        for entry in entries {
            match NewAttachment::from_entry(entry)? {
                Some(inline) => {
                    let row = AttachmentRepo::insert(
                        conn,
                        input.conversation,
                        turn,
                        event,
                        &input.agent_id,
                        &inline,
                        now,
                    )?;
                    refs.push(attachment::reference(&row));
                    stored_any = true;
                }
                None => refs.push(entry.clone()),
            }
        }
        if !stored_any {
            return Ok(None);
        }

        let mut payload = input.payload.clone();
        if let Some(obj) = payload.as_object_mut() {
            let _ = obj.insert(ATTACHMENTS_KEY.to_string(), Value::Array(refs));
        }
        debug!(count = entries.len(), "attachments extracted");
        Ok(Some(payload))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a new active conversation with the given metadata.
    pub fn create_conversation(&self, meta: &ConversationMeta) -> Result<ConversationRow> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let id = ConversationRepo::create(&tx, meta, &time::now())?;
        let row = ConversationRepo::get(&tx, id)?.ok_or(EventStoreError::ConversationNotFound(id))?;
        tx.commit()?;
        Ok(row)
    }

    /// Fetch one conversation.
    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRow>> {
        let conn = self.conn()?;
        ConversationRepo::get(&conn, id)
    }

    /// List conversations, newest first.
    pub fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationRow>> {
        let conn = self.conn()?;
        ConversationRepo::list(&conn, status)
    }

    /// Replace a conversation's metadata.
    pub fn update_metadata(&self, id: i64, meta: &ConversationMeta) -> Result<()> {
        let conn = self.conn()?;
        if ConversationRepo::update_metadata(&conn, id, meta)? {
            Ok(())
        } else {
            Err(EventStoreError::ConversationNotFound(id))
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event reads
    // ─────────────────────────────────────────────────────────────────────

    /// Every event of a conversation in seq order.
    pub fn get_events(&self, conversation: i64) -> Result<Vec<EventRow>> {
        let conn = self.conn()?;
        EventRepo::list(&conn, conversation)
    }

    /// Events with `seq > since`.
    pub fn get_events_since(&self, conversation: i64, since: i64) -> Result<Vec<EventRow>> {
        let conn = self.conn()?;
        EventRepo::since(&conn, conversation, since)
    }

    /// At most `limit` events with `seq > after`.
    pub fn get_events_page(
        &self,
        conversation: i64,
        after: i64,
        limit: u32,
    ) -> Result<Vec<EventRow>> {
        let conn = self.conn()?;
        EventRepo::page(&conn, conversation, after, i64::from(limit))
    }

    /// One event by cursor.
    pub fn get_event_by_seq(&self, conversation: i64, seq: i64) -> Result<Option<EventRow>> {
        let conn = self.conn()?;
        EventRepo::by_seq(&conn, conversation, seq)
    }

    /// Derived head of the log.
    pub fn get_head(&self, conversation: i64) -> Result<Head> {
        let conn = self.conn()?;
        EventRepo::head(&conn, conversation)
    }

    /// Most recent event of any kind.
    pub fn last_event(&self, conversation: i64) -> Result<Option<EventRow>> {
        let conn = self.conn()?;
        EventRepo::last(&conn, conversation)
    }

    /// Most recent message or trace.
    pub fn last_non_system_event(&self, conversation: i64) -> Result<Option<EventRow>> {
        let conn = self.conn()?;
        EventRepo::last_non_system(&conn, conversation)
    }

    /// Most recent turn-closing message.
    pub fn last_closing_event(&self, conversation: i64) -> Result<Option<EventRow>> {
        let conn = self.conn()?;
        EventRepo::last_closing(&conn, conversation)
    }

    /// Number of closed turns.
    pub fn count_closed_turns(&self, conversation: i64) -> Result<i64> {
        let conn = self.conn()?;
        EventRepo::count_closed_turns(&conn, conversation)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Attachments
    // ─────────────────────────────────────────────────────────────────────

    /// Attachment by id.
    pub fn get_attachment(&self, id: &str) -> Result<Option<AttachmentRow>> {
        let conn = self.conn()?;
        AttachmentRepo::get(&conn, id)
    }

    /// Latest attachment with a logical doc id.
    pub fn get_attachment_by_doc_id(
        &self,
        conversation: i64,
        doc_id: &str,
    ) -> Result<Option<AttachmentRow>> {
        let conn = self.conn()?;
        AttachmentRepo::get_by_doc_id(&conn, conversation, doc_id)
    }

    /// All attachments of a conversation.
    pub fn list_attachments(&self, conversation: i64) -> Result<Vec<AttachmentRow>> {
        let conn = self.conn()?;
        AttachmentRepo::list_by_conversation(&conn, conversation)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Turn claims
    // ─────────────────────────────────────────────────────────────────────

    /// First-insert-wins claim on a guidance.
    pub fn claim_turn(
        &self,
        conversation: i64,
        guidance_seq: f64,
        agent_id: &str,
        expires_at: &str,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let won = TurnClaimRepo::claim(
            &conn,
            conversation,
            guidance_seq,
            agent_id,
            &time::now(),
            expires_at,
        )?;
        debug!(conversation, guidance_seq, agent_id, won, "turn claim");
        Ok(won)
    }

    /// Current holder of a claim.
    pub fn get_claim(&self, conversation: i64, guidance_seq: f64) -> Result<Option<TurnClaimRow>> {
        let conn = self.conn()?;
        TurnClaimRepo::get(&conn, conversation, guidance_seq)
    }

    /// Unexpired claims of a conversation.
    pub fn active_claims(&self, conversation: i64) -> Result<Vec<TurnClaimRow>> {
        let conn = self.conn()?;
        TurnClaimRepo::active_for_conversation(&conn, conversation, &time::now())
    }

    /// Claims expired at `now`.
    pub fn expired_claims(&self, now: &str) -> Result<Vec<TurnClaimRow>> {
        let conn = self.conn()?;
        TurnClaimRepo::expired(&conn, now)
    }

    /// Purge claims expired at `now`.
    pub fn delete_expired_claims(&self, now: &str) -> Result<usize> {
        let conn = self.conn()?;
        TurnClaimRepo::delete_expired(&conn, now)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scenarios
    // ─────────────────────────────────────────────────────────────────────

    /// Insert or replace a scenario.
    pub fn upsert_scenario(&self, scenario: &Scenario) -> Result<()> {
        let conn = self.conn()?;
        ScenarioRepo::upsert(&conn, scenario, &time::now())
    }

    /// Fetch a scenario.
    pub fn get_scenario(&self, id: &str) -> Result<Option<Scenario>> {
        let conn = self.conn()?;
        ScenarioRepo::get(&conn, id)
    }

    /// All scenarios.
    pub fn list_scenarios(&self) -> Result<Vec<Scenario>> {
        let conn = self.conn()?;
        ScenarioRepo::list(&conn)
    }

    /// Delete a scenario.
    pub fn delete_scenario(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        ScenarioRepo::delete(&conn, id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn store() -> EventStore {
        EventStore::in_memory().unwrap()
    }

    fn close(store: &EventStore, conv: i64, turn: i64, agent: &str) -> Appended {
        store
            .append(
                &AppendEvent::message(conv, agent, json!({"text": "done"}))
                    .in_turn(turn)
                    .with_finality(Finality::Turn),
            )
            .unwrap()
    }

    #[test]
    fn first_message_defaults_to_turn_one() {
        let s = store();
        let out = s
            .append(&AppendEvent::message(1, "a", json!({"text": "hi"})))
            .unwrap();
        assert_eq!((out.row.turn, out.row.event, out.row.seq), (1, 1, 1));
        assert!(!out.replayed);
        assert!(s.get_conversation(1).unwrap().is_some());
    }

    #[test]
    fn omitted_turn_rejected_once_turns_exist() {
        let s = store();
        close(&s, 1, 1, "a");
        let err = s
            .append(&AppendEvent::message(1, "b", json!({})))
            .unwrap_err();
        assert_matches!(err, EventStoreError::InvalidTurnNumber { .. });
    }

    #[test]
    fn system_events_go_to_turn_zero() {
        let s = store();
        let out = s
            .append(&AppendEvent::system(1, "system", json!({"kind": "note"})).in_turn(7))
            .unwrap();
        assert_eq!(out.row.turn, 0);
        assert_eq!(s.get_head(1).unwrap(), Head::default());
    }

    #[test]
    fn closed_turn_rejects_appends() {
        let s = store();
        close(&s, 1, 1, "a");
        let err = s
            .append(&AppendEvent::trace(1, "a", json!({})).in_turn(1))
            .unwrap_err();
        assert_matches!(err, EventStoreError::TurnAlreadyFinalized { turn: 1, .. });
    }

    #[test]
    fn cannot_skip_or_open_while_open() {
        let s = store();
        s.append(&AppendEvent::trace(1, "a", json!({})).in_turn(1)).unwrap();
        assert_matches!(
            s.append(&AppendEvent::trace(1, "b", json!({})).in_turn(2)),
            Err(EventStoreError::InvalidTurnNumber { .. })
        );
        assert_matches!(
            s.append(&AppendEvent::trace(1, "b", json!({})).in_turn(3)),
            Err(EventStoreError::InvalidTurnNumber { .. })
        );
        assert_matches!(
            s.append(&AppendEvent::trace(1, "b", json!({})).in_turn(0)),
            Err(EventStoreError::InvalidTurnNumber { .. })
        );
    }

    #[test]
    fn trace_with_finality_rejected_before_write() {
        let s = store();
        let err = s
            .append(
                &AppendEvent::trace(1, "a", json!({}))
                    .in_turn(1)
                    .with_finality(Finality::Turn),
            )
            .unwrap_err();
        assert_matches!(
            err,
            EventStoreError::InvalidFinality {
                event_type: EventType::Trace
            }
        );
        assert!(s.get_events(1).unwrap().is_empty());
    }

    #[test]
    fn conversation_finality_completes_and_blocks() {
        let s = store();
        s.append(
            &AppendEvent::message(1, "a", json!({"outcome": {"status": "completed"}}))
                .in_turn(1)
                .with_finality(Finality::Conversation),
        )
        .unwrap();
        let conv = s.get_conversation(1).unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Completed);
        for input in [
            AppendEvent::system(1, "system", json!({})),
            AppendEvent::message(1, "b", json!({})).in_turn(2),
            AppendEvent::trace(1, "b", json!({})).in_turn(1),
        ] {
            assert_matches!(
                s.append(&input),
                Err(EventStoreError::ConversationFinalized { conversation: 1 })
            );
        }
    }

    #[test]
    fn idempotent_replay_returns_original() {
        let s = store();
        let input = AppendEvent::message(1, "a", json!({"text": "x", "clientRequestId": "r-1"}))
            .in_turn(1)
            .with_finality(Finality::Turn);
        let first = s.append(&input).unwrap();
        let second = s.append(&input).unwrap();
        assert!(second.replayed);
        assert_eq!(first.result(), second.result());
        assert_eq!(s.get_events(1).unwrap().len(), 1);
    }

    #[test]
    fn same_request_id_different_agent_is_new() {
        let s = store();
        s.append(&AppendEvent::trace(1, "a", json!({"clientRequestId": "r"})).in_turn(1))
            .unwrap();
        let out = s
            .append(&AppendEvent::trace(1, "b", json!({"clientRequestId": "r"})).in_turn(1))
            .unwrap();
        assert!(!out.replayed);
        assert_eq!(out.row.seq, 2);
    }

    #[test]
    fn attachments_extracted_to_references() {
        let s = store();
        let out = s
            .append(
                &AppendEvent::message(
                    1,
                    "a",
                    json!({
                        "text": "see files",
                        "attachments": [
                            {"name": "a.md", "contentType": "text/markdown", "content": "# A", "docId": "design"},
                            {"name": "b.txt", "content": "bee", "summary": "b"},
                            {"id": "att_existing", "name": "c.txt", "docId": "c"}
                        ]
                    }),
                )
                .in_turn(1),
            )
            .unwrap();

        let stored = s.get_event_by_seq(1, out.row.seq).unwrap().unwrap();
        assert_eq!(stored.payload, out.row.payload);
        let refs = stored.payload["attachments"].as_array().unwrap();
        assert_eq!(refs.len(), 3);
        assert!(refs.iter().all(|r| r.get("content").is_none()));
        assert_eq!(refs[0]["docId"], "design");
        assert_eq!(refs[2]["id"], "att_existing");

        let rows = s.list_attachments(1).unwrap();
        assert_eq!(rows.len(), 2);
        let b = s.get_attachment(refs[1]["id"].as_str().unwrap()).unwrap().unwrap();
        assert_eq!(b.content, "bee");
        assert_eq!(b.doc_id, b.id);
        assert_eq!(
            s.get_attachment_by_doc_id(1, "design").unwrap().unwrap().content,
            "# A"
        );
    }

    #[test]
    fn bad_attachment_rolls_back_whole_append() {
        let s = store();
        let err = s
            .append(
                &AppendEvent::message(
                    1,
                    "a",
                    json!({"attachments": [{"name": "ok", "content": "x"}, {"content": 3}]}),
                )
                .in_turn(1),
            )
            .unwrap_err();
        assert_matches!(err, EventStoreError::InvalidAttachment(_));
        assert!(s.get_events(1).unwrap().is_empty());
        assert!(s.list_attachments(1).unwrap().is_empty());
    }

    #[test]
    fn traces_keep_attachment_content() {
        let s = store();
        let out = s
            .append(
                &AppendEvent::trace(1, "a", json!({"attachments": [{"content": "raw"}]})).in_turn(1),
            )
            .unwrap();
        assert_eq!(out.row.payload["attachments"][0]["content"], "raw");
        assert!(s.list_attachments(1).unwrap().is_empty());
    }

    #[test]
    fn head_and_paging() {
        let s = store();
        s.append(&AppendEvent::system(1, "system", json!({}))).unwrap();
        s.append(&AppendEvent::trace(1, "a", json!({})).in_turn(1)).unwrap();
        let closed = close(&s, 1, 1, "a");
        s.append(&AppendEvent::trace(1, "b", json!({})).in_turn(2)).unwrap();

        let head = s.get_head(1).unwrap();
        assert_eq!(head.last_turn, 2);
        assert_eq!(head.last_closed_seq, closed.row.seq);
        assert!(head.has_open_turn);

        let page = s.get_events_page(1, 1, 2).unwrap();
        assert_eq!(page.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(s.get_events_since(1, 3).unwrap().len(), 1);
    }

    #[test]
    fn conversations_are_independent() {
        let s = store();
        close(&s, 1, 1, "a");
        let out = s.append(&AppendEvent::message(2, "a", json!({}))).unwrap();
        assert_eq!((out.row.turn, out.row.seq), (1, 1));
    }

    #[test]
    fn create_conversation_assigns_id() {
        let s = store();
        let meta = ConversationMeta {
            title: Some("x".into()),
            ..ConversationMeta::default()
        };
        let a = s.create_conversation(&meta).unwrap();
        let b = s.create_conversation(&meta).unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.metadata.title.as_deref(), Some("x"));
        assert_eq!(
            s.list_conversations(Some(ConversationStatus::Active)).unwrap().len(),
            2
        );
    }

    #[test]
    fn claims_through_store() {
        let s = store();
        let expires = time::after_ms(chrono::Utc::now(), 60_000);
        assert!(s.claim_turn(1, 2.1, "a", &expires).unwrap());
        assert!(!s.claim_turn(1, 2.1, "b", &expires).unwrap());
        assert_eq!(s.active_claims(1).unwrap().len(), 1);
        assert_eq!(s.delete_expired_claims(&time::now()).unwrap(), 0);
    }

    #[test]
    fn metadata_update_and_scenario_delete() {
        let s = store();
        let row = s.create_conversation(&ConversationMeta::default()).unwrap();
        let meta = ConversationMeta {
            title: Some("renamed".into()),
            ..ConversationMeta::default()
        };
        s.update_metadata(row.id, &meta).unwrap();
        assert_eq!(
            s.get_conversation(row.id).unwrap().unwrap().metadata.title.as_deref(),
            Some("renamed")
        );
        assert_matches!(
            s.update_metadata(404, &meta),
            Err(EventStoreError::ConversationNotFound(404))
        );

        let scenario: Scenario = serde_json::from_value(json!({
            "id": "debate",
            "name": "Debate",
            "agents": [{"agentId": "pro", "kind": "internal"}]
        }))
        .unwrap();
        s.upsert_scenario(&scenario).unwrap();
        assert!(s.delete_scenario("debate").unwrap());
        assert!(!s.delete_scenario("debate").unwrap());
        assert!(s.get_scenario("debate").unwrap().is_none());
    }
}
