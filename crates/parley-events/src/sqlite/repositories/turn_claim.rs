//! Turn claims: first-insert-wins ownership of a guidance.
//!
//! The primary key `(conversation, guidance_seq)` is the whole mechanism.
//! `claim` never reads before writing, so two racing callers cannot both see
//! "free" and both succeed.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::TurnClaimRow;

const COLUMNS: &str = "conversation, guidance_seq, agent_id, claimed_at, expires_at";

/// Turn claim repository.
pub struct TurnClaimRepo;

impl TurnClaimRepo {
    /// Try to take `(conversation, guidance_seq)`. `true` only for the first
    /// caller; everyone else, including the winner retrying, gets `false`.
    pub fn claim(
        conn: &Connection,
        conversation: i64,
        guidance_seq: f64,
        agent_id: &str,
        claimed_at: &str,
        expires_at: &str,
    ) -> Result<bool> {
        let changed = conn.execute(
            &format!("INSERT OR IGNORE INTO turn_claims ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![conversation, guidance_seq, agent_id, claimed_at, expires_at],
        )?;
        Ok(changed == 1)
    }

    /// Current holder of a claim, expired or not.
    pub fn get(
        conn: &Connection,
        conversation: i64,
        guidance_seq: f64,
    ) -> Result<Option<TurnClaimRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM turn_claims WHERE conversation = ?1 AND guidance_seq = ?2"
                ),
                params![conversation, guidance_seq],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Unexpired claims of one conversation.
    pub fn active_for_conversation(
        conn: &Connection,
        conversation: i64,
        now: &str,
    ) -> Result<Vec<TurnClaimRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM turn_claims
             WHERE conversation = ?1 AND expires_at > ?2
             ORDER BY guidance_seq"
        ))?;
        let rows = stmt
            .query_map(params![conversation, now], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Claims whose expiry is at or before `now`.
    pub fn expired(conn: &Connection, now: &str) -> Result<Vec<TurnClaimRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM turn_claims WHERE expires_at <= ?1 ORDER BY expires_at"
        ))?;
        let rows = stmt
            .query_map(params![now], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove expired claims, returning how many were deleted.
    pub fn delete_expired(conn: &Connection, now: &str) -> Result<usize> {
        Ok(conn.execute(
            "DELETE FROM turn_claims WHERE expires_at <= ?1",
            params![now],
        )?)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TurnClaimRow> {
        Ok(TurnClaimRow {
            conversation: row.get(0)?,
            guidance_seq: row.get(1)?,
            agent_id: row.get(2)?,
            claimed_at: row.get(3)?,
            expires_at: row.get(4)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
