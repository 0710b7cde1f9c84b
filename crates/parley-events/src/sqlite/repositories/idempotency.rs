//! Idempotency index: `(conversation, agent, clientRequestId) → seq`.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// `(conversation, agent, clientRequestId)` to seq.
pub struct IdempotencyRepo;

impl IdempotencyRepo {
    /// Seq previously recorded for this key.
    pub fn lookup(
        conn: &Connection,
        conversation: i64,
        agent_id: &str,
        client_request_id: &str,
    ) -> Result<Option<i64>> {
        let seq = conn
            .query_row(
                "SELECT seq FROM idempotency_keys
                 WHERE conversation = ?1 AND agent_id = ?2 AND client_request_id = ?3",
                params![conversation, agent_id, client_request_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq)
    }

    /// Record a key. Write-once: returns `false` if the key already existed.
    pub fn record(
        conn: &Connection,
        conversation: i64,
        agent_id: &str,
        client_request_id: &str,
        seq: i64,
        now: &str,
    ) -> Result<bool> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO idempotency_keys
               (conversation, agent_id, client_request_id, seq, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![conversation, agent_id, client_request_id, seq, now],
        )?;
        Ok(changed == 1)
    }
}
