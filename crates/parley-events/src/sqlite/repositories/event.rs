//! Event repository: the append-only log itself.
//!
//! Rows are immutable once written except for [`EventRepo::update_payload`],
//! used once inside the append transaction to swap inline attachments for
//! references. A turn is closed when it holds a message whose finality is not
//! `none`; everything about turn state is derived from that.

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use parley_core::{EventType, Finality};

use crate::errors::Result;
use crate::sqlite::row_types::{EventRow, Head, conversion_error};

const COLUMNS: &str = "conversation, turn, event, seq, type, payload, finality, ts, agent_id";

/// Fully resolved row to insert.
#[derive(Debug)]
pub struct NewEvent<'a> {
    /// Conversation id.
    pub conversation: i64,
    /// Resolved turn.
    pub turn: i64,
    /// Position within the turn.
    pub event: i64,
    /// Cursor.
    pub seq: i64,
    /// Kind.
    pub event_type: EventType,
    /// Payload as stored.
    pub payload: &'a Value,
    /// Finality marker.
    pub finality: Finality,
    /// Commit timestamp.
    pub ts: &'a str,
    /// Author.
    pub agent_id: &'a str,
}

/// Stateless; every method takes a `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert a row.
    pub fn insert(conn: &Connection, event: &NewEvent<'_>) -> Result<()> {
        let payload = serde_json::to_string(event.payload)?;
        let _ = conn.execute(
            &format!("INSERT INTO conversation_events ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                event.conversation,
                event.turn,
                event.event,
                event.seq,
                event.event_type.as_str(),
                payload,
                event.finality.as_str(),
                event.ts,
                event.agent_id,
            ],
        )?;
        Ok(())
    }

    /// Rewrite the stored payload of one row.
    pub fn update_payload(
        conn: &Connection,
        conversation: i64,
        seq: i64,
        payload: &Value,
    ) -> Result<()> {
        let payload = serde_json::to_string(payload)?;
        let _ = conn.execute(
            "UPDATE conversation_events SET payload = ?3 WHERE conversation = ?1 AND seq = ?2",
            params![conversation, seq, payload],
        )?;
        Ok(())
    }

    /// Next cursor value for a conversation (1 for an empty log).
    pub fn next_seq(conn: &Connection, conversation: i64) -> Result<i64> {
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM conversation_events WHERE conversation = ?1",
            params![conversation],
            |row| row.get(0),
        )?;
        Ok(max + 1)
    }

    /// Next 1-based position within a turn.
    pub fn next_event_in_turn(conn: &Connection, conversation: i64, turn: i64) -> Result<i64> {
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(event), 0) FROM conversation_events
             WHERE conversation = ?1 AND turn = ?2",
            params![conversation, turn],
            |row| row.get(0),
        )?;
        Ok(max + 1)
    }

    /// Whether `turn` holds a closing message.
    pub fn is_turn_closed(conn: &Connection, conversation: i64, turn: i64) -> Result<bool> {
        let closed: bool = conn.query_row(
            "SELECT EXISTS (
               SELECT 1 FROM conversation_events
                WHERE conversation = ?1 AND turn = ?2
                  AND type = 'message' AND finality <> 'none')",
            params![conversation, turn],
            |row| row.get(0),
        )?;
        Ok(closed)
    }

    /// Derive the log head.
    pub fn head(conn: &Connection, conversation: i64) -> Result<Head> {
        let (last_turn, last_closed_seq): (i64, i64) = conn.query_row(
            "SELECT
               COALESCE((SELECT MAX(turn) FROM conversation_events
                          WHERE conversation = ?1 AND turn > 0), 0),
               COALESCE((SELECT MAX(seq) FROM conversation_events
                          WHERE conversation = ?1 AND type = 'message' AND finality <> 'none'), 0)",
            params![conversation],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let has_open_turn = last_turn > 0 && !Self::is_turn_closed(conn, conversation, last_turn)?;
        Ok(Head {
            last_turn,
            last_closed_seq,
            has_open_turn,
        })
    }

    /// Number of distinct turns closed so far.
    pub fn count_closed_turns(conn: &Connection, conversation: i64) -> Result<i64> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT turn) FROM conversation_events
             WHERE conversation = ?1 AND turn > 0 AND type = 'message' AND finality <> 'none'",
            params![conversation],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// All rows of a conversation in seq order.
    pub fn list(conn: &Connection, conversation: i64) -> Result<Vec<EventRow>> {
        Self::query(
            conn,
            &format!("SELECT {COLUMNS} FROM conversation_events WHERE conversation = ?1 ORDER BY seq ASC"),
            params![conversation],
        )
    }

    /// Rows with `seq > since`, in seq order.
    pub fn since(conn: &Connection, conversation: i64, since: i64) -> Result<Vec<EventRow>> {
        Self::query(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM conversation_events
                 WHERE conversation = ?1 AND seq > ?2 ORDER BY seq ASC"
            ),
            params![conversation, since],
        )
    }

    /// At most `limit` rows with `seq > after`, in seq order.
    pub fn page(
        conn: &Connection,
        conversation: i64,
        after: i64,
        limit: i64,
    ) -> Result<Vec<EventRow>> {
        Self::query(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM conversation_events
                 WHERE conversation = ?1 AND seq > ?2 ORDER BY seq ASC LIMIT ?3"
            ),
            params![conversation, after, limit],
        )
    }

    /// One row by cursor.
    pub fn by_seq(conn: &Connection, conversation: i64, seq: i64) -> Result<Option<EventRow>> {
        Self::query_one(
            conn,
            &format!("SELECT {COLUMNS} FROM conversation_events WHERE conversation = ?1 AND seq = ?2"),
            params![conversation, seq],
        )
    }

    /// Most recent row of any kind.
    pub fn last(conn: &Connection, conversation: i64) -> Result<Option<EventRow>> {
        Self::query_one(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM conversation_events
                 WHERE conversation = ?1 ORDER BY seq DESC LIMIT 1"
            ),
            params![conversation],
        )
    }

    /// Most recent message or trace (ignores the system lane).
    pub fn last_non_system(conn: &Connection, conversation: i64) -> Result<Option<EventRow>> {
        Self::query_one(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM conversation_events
                 WHERE conversation = ?1 AND type <> 'system' ORDER BY seq DESC LIMIT 1"
            ),
            params![conversation],
        )
    }

    /// Most recent turn-closing message.
    pub fn last_closing(conn: &Connection, conversation: i64) -> Result<Option<EventRow>> {
        Self::query_one(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM conversation_events
                 WHERE conversation = ?1 AND type = 'message' AND finality <> 'none'
                 ORDER BY seq DESC LIMIT 1"
            ),
            params![conversation],
        )
    }

    fn query(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<EventRow>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn query_one(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<EventRow>> {
        Ok(conn.query_row(sql, params, Self::map_row).optional()?)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
        let event_type: String = row.get(4)?;
        let payload: String = row.get(5)?;
        let finality: String = row.get(6)?;
        Ok(EventRow {
            conversation: row.get(0)?,
            turn: row.get(1)?,
            event: row.get(2)?,
            seq: row.get(3)?,
            event_type: event_type.parse().map_err(|e| conversion_error(4, e))?,
            payload: serde_json::from_str(&payload).map_err(|e| conversion_error(5, e))?,
            finality: finality.parse().map_err(|e| conversion_error(6, e))?,
            ts: row.get(7)?,
            agent_id: row.get(8)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
