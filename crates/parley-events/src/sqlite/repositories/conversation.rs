//! Conversation repository.

use rusqlite::{Connection, OptionalExtension, params};

use parley_core::{ConversationMeta, ConversationStatus};

use crate::errors::Result;
use crate::sqlite::row_types::{ConversationRow, conversion_error};

const COLUMNS: &str = "id, status, metadata, created_at, updated_at";

/// Conversation rows and their status.
pub struct ConversationRepo;

impl ConversationRepo {
    /// Insert a new conversation and return its id.
    pub fn create(conn: &Connection, meta: &ConversationMeta, now: &str) -> Result<i64> {
        let metadata = serde_json::to_string(meta)?;
        let _ = conn.execute(
            "INSERT INTO conversations (status, metadata, created_at, updated_at)
             VALUES ('active', ?1, ?2, ?2)",
            params![metadata, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Create an empty shell row for `id` if it does not exist.
    ///
    /// Returns `true` when a row was inserted.
    pub fn ensure(conn: &Connection, id: i64, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO conversations (id, status, metadata, created_at, updated_at)
             VALUES (?1, 'active', '{}', ?2, ?2)",
            params![id, now],
        )?;
        Ok(changed == 1)
    }

    /// Fetch one conversation.
    pub fn get(conn: &Connection, id: i64) -> Result<Option<ConversationRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Current status, without decoding metadata.
    pub fn status(conn: &Connection, id: i64) -> Result<Option<ConversationStatus>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(Some(
                s.parse::<ConversationStatus>()
                    .map_err(|e| conversion_error(0, e))?,
            )),
            None => Ok(None),
        }
    }

    /// List conversations, newest first, optionally filtered by status.
    pub fn list(
        conn: &Connection,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM conversations
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY id DESC"
        ))?;
        let rows = stmt
            .query_map(params![status.map(ConversationStatus::as_str)], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Flip an active conversation to completed. Returns `false` if it was
    /// already completed.
    pub fn mark_completed(conn: &Connection, id: i64) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE conversations SET status = 'completed' WHERE id = ?1 AND status = 'active'",
            params![id],
        )?;
        Ok(changed == 1)
    }

    /// Replace the metadata blob.
    pub fn update_metadata(conn: &Connection, id: i64, meta: &ConversationMeta) -> Result<bool> {
        let metadata = serde_json::to_string(meta)?;
        let changed = conn.execute(
            "UPDATE conversations SET metadata = ?2 WHERE id = ?1",
            params![id, metadata],
        )?;
        Ok(changed == 1)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
        let status: String = row.get(1)?;
        let metadata: String = row.get(2)?;
        Ok(ConversationRow {
            id: row.get(0)?,
            status: status.parse().map_err(|e| conversion_error(1, e))?,
            metadata: serde_json::from_str(&metadata).map_err(|e| conversion_error(2, e))?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
