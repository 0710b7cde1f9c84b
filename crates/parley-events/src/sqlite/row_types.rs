//! Row types returned by the repositories.
//!
//! Rows are decoded eagerly: enum columns become [`EventType`] / [`Finality`]
//! / [`ConversationStatus`], JSON columns become [`Value`]. A row that fails
//! to decode surfaces as a `FromSqlConversionFailure`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::{ConversationMeta, ConversationStatus, EventType, Finality};

/// One persisted log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    /// Conversation id.
    pub conversation: i64,
    /// Turn number (0 = system lane).
    pub turn: i64,
    /// 1-based position within the turn.
    pub event: i64,
    /// Per-conversation cursor, contiguous from 1.
    pub seq: i64,
    /// Kind of entry.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Stored payload (attachments already in reference form).
    pub payload: Value,
    /// Finality marker.
    pub finality: Finality,
    /// RFC 3339 commit timestamp.
    pub ts: String,
    /// Authoring agent.
    pub agent_id: String,
}

impl EventRow {
    /// Whether this row closes its turn.
    pub fn closes_turn(&self) -> bool {
        self.event_type == EventType::Message && self.finality.closes_turn()
    }

    /// Whether this row closes the conversation.
    pub fn closes_conversation(&self) -> bool {
        self.event_type == EventType::Message && self.finality == Finality::Conversation
    }
}

/// One row of `conversations`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRow {
    /// Conversation id.
    pub id: i64,
    /// Lifecycle status.
    pub status: ConversationStatus,
    /// Decoded metadata.
    pub metadata: ConversationMeta,
    /// Creation timestamp.
    pub created_at: String,
    /// Last status/metadata change.
    pub updated_at: String,
}

/// One row of `attachments`, including content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRow {
    /// Attachment id (`att_…`).
    pub id: String,
    /// Owning conversation.
    pub conversation: i64,
    /// Owning turn.
    pub turn: i64,
    /// Owning event within the turn.
    pub event: i64,
    /// Logical document id.
    pub doc_id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Raw content.
    pub content: String,
    /// Hex SHA-256 of `content`.
    pub content_hash: String,
    /// Optional short summary.
    pub summary: Option<String>,
    /// Author of the owning message.
    pub created_by_agent_id: String,
    /// Insert timestamp.
    pub created_at: String,
}

/// One row of `turn_claims`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnClaimRow {
    /// Conversation id.
    pub conversation: i64,
    /// Fractional guidance seq being claimed.
    pub guidance_seq: f64,
    /// Winner.
    pub agent_id: String,
    /// When the claim was taken.
    pub claimed_at: String,
    /// When it lapses.
    pub expires_at: String,
}

/// Derived position of a conversation's log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Head {
    /// Highest non-system turn written (0 when none).
    pub last_turn: i64,
    /// Seq of the most recent turn-closing message (0 when none).
    pub last_closed_seq: i64,
    /// Whether `last_turn` has events but no closing message yet.
    pub has_open_turn: bool,
}

/// Commit coordinates returned by `append`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResult {
    /// Conversation id.
    pub conversation: i64,
    /// Turn written.
    pub turn: i64,
    /// Position within the turn.
    pub event: i64,
    /// Cursor.
    pub seq: i64,
    /// Commit timestamp.
    pub ts: String,
}

impl From<&EventRow> for AppendResult {
    fn from(row: &EventRow) -> Self {
        Self {
            conversation: row.conversation,
            turn: row.turn,
            event: row.event,
            seq: row.seq,
            ts: row.ts.clone(),
        }
    }
}

pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}
