//! Attachment repository: documents extracted from message payloads.
//!
//! An inline attachment is an entry of `payload.attachments` carrying a
//! `content` string. Entries without `content` are already references and are
//! left as they are. Content is hashed with SHA-256; the hash is kept for
//! integrity checks and dedup-aware readers, ids are always fresh.

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{EventStoreError, Result};
use crate::sqlite::row_types::AttachmentRow;

const COLUMNS: &str = "id, conversation, turn, event, doc_id, name, content_type, content, \
                       content_hash, summary, created_by_agent_id, created_at";

/// An attachment parsed from a payload entry, not yet stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAttachment {
    /// Caller-supplied logical id.
    pub doc_id: Option<String>,
    /// File name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Raw content.
    pub content: String,
    /// Optional summary.
    pub summary: Option<String>,
}

impl NewAttachment {
    /// Parse one `payload.attachments` entry.
    ///
    /// Returns `Ok(None)` for reference-only entries (no `content`).
    pub fn from_entry(entry: &Value) -> Result<Option<Self>> {
        let Some(obj) = entry.as_object() else {
            return Err(EventStoreError::InvalidAttachment(
                "attachment entries must be objects".into(),
            ));
        };
        let Some(content) = obj.get("content") else {
            return Ok(None);
        };
        let Some(content) = content.as_str() else {
            return Err(EventStoreError::InvalidAttachment(
                "attachment content must be a string".into(),
            ));
        };
        Ok(Some(Self {
            doc_id: str_field(obj, "docId"),
            name: str_field(obj, "name").unwrap_or_else(|| "attachment".to_string()),
            content_type: str_field(obj, "contentType")
                .unwrap_or_else(|| "text/plain".to_string()),
            content: content.to_string(),
            summary: str_field(obj, "summary"),
        }))
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Hex-encoded SHA-256 of `content`.
pub fn hex_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Attachment rows, keyed by uuid.
pub struct AttachmentRepo;

impl AttachmentRepo {
    /// Store one attachment owned by `(conversation, turn, event)`.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        conn: &Connection,
        conversation: i64,
        turn: i64,
        event: i64,
        agent_id: &str,
        attachment: &NewAttachment,
        now: &str,
    ) -> Result<AttachmentRow> {
        let id = format!("att_{}", Uuid::now_v7());
        let row = AttachmentRow {
            doc_id: attachment.doc_id.clone().unwrap_or_else(|| id.clone()),
            id,
            conversation,
            turn,
            event,
            name: attachment.name.clone(),
            content_type: attachment.content_type.clone(),
            content: attachment.content.clone(),
            content_hash: hex_sha256(attachment.content.as_bytes()),
            summary: attachment.summary.clone(),
            created_by_agent_id: agent_id.to_string(),
            created_at: now.to_string(),
        };
        let _ = conn.execute(
            &format!(
                "INSERT INTO attachments ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                row.id,
                row.conversation,
                row.turn,
                row.event,
                row.doc_id,
                row.name,
                row.content_type,
                row.content,
                row.content_hash,
                row.summary,
                row.created_by_agent_id,
                row.created_at,
            ],
        )?;
        Ok(row)
    }

    /// Fetch by attachment id.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<AttachmentRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM attachments WHERE id = ?1"),
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Latest attachment with this logical id in a conversation.
    pub fn get_by_doc_id(
        conn: &Connection,
        conversation: i64,
        doc_id: &str,
    ) -> Result<Option<AttachmentRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM attachments
                     WHERE conversation = ?1 AND doc_id = ?2
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![conversation, doc_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Every attachment of a conversation, oldest first.
    pub fn list_by_conversation(conn: &Connection, conversation: i64) -> Result<Vec<AttachmentRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM attachments WHERE conversation = ?1 ORDER BY turn, event, rowid"
        ))?;
        let rows = stmt
            .query_map(params![conversation], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttachmentRow> {
        Ok(AttachmentRow {
            id: row.get(0)?,
            conversation: row.get(1)?,
            turn: row.get(2)?,
            event: row.get(3)?,
            doc_id: row.get(4)?,
            name: row.get(5)?,
            content_type: row.get(6)?,
            content: row.get(7)?,
            content_hash: row.get(8)?,
            summary: row.get(9)?,
            created_by_agent_id: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

/// Reference form stored in the message payload in place of the content.
pub fn reference(row: &AttachmentRow) -> Value {
    json!({
        "id": row.id,
        "name": row.name,
        "contentType": row.content_type,
        "docId": row.doc_id,
        "summary": row.summary,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
