//! Error types for the event log.
//!
//! [`EventStoreError`] carries both infrastructure failures (`SQLite`, pool,
//! JSON) and the log's invariant violations. Invariant variants are returned
//! from inside the append transaction, so nothing has been written when a
//! caller sees one.

use thiserror::Error;

use parley_core::EventType;

/// Errors that can occur during event store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// The conversation was closed by a finality=conversation message.
    #[error("conversation {conversation} is finalized")]
    ConversationFinalized {
        /// Conversation id.
        conversation: i64,
    },

    /// The target turn already has a closing message.
    #[error("turn {turn} of conversation {conversation} is already finalized")]
    TurnAlreadyFinalized {
        /// Conversation id.
        conversation: i64,
        /// Closed turn.
        turn: i64,
    },

    /// The requested turn number cannot be written.
    #[error("invalid turn number for conversation {conversation}: {reason}")]
    InvalidTurnNumber {
        /// Conversation id.
        conversation: i64,
        /// What was wrong with it.
        reason: String,
    },

    /// Finality other than `none` on a non-message event.
    #[error("{event_type} events cannot carry finality")]
    InvalidFinality {
        /// Offending event type.
        event_type: EventType,
    },

    /// Malformed inline attachment.
    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),

    /// Requested conversation was not found.
    #[error("conversation not found: {0}")]
    ConversationNotFound(i64),

    /// Requested scenario was not found.
    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    /// Stored state contradicts itself (e.g. a dangling idempotency key).
    #[error("internal error: {0}")]
    Internal(String),
}

impl EventStoreError {
    /// Whether this is one of the log's invariant violations (as opposed to
    /// an infrastructure failure).
    pub fn is_invariant(&self) -> bool {
        matches!(
            self,
            Self::ConversationFinalized { .. }
                | Self::TurnAlreadyFinalized { .. }
                | Self::InvalidTurnNumber { .. }
                | Self::InvalidFinality { .. }
                | Self::InvalidAttachment(_)
        )
    }
}

/// Convenience type alias for event store results.
pub type Result<T> = std::result::Result<T, EventStoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_display() {
        let err = EventStoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
        assert!(!err.is_invariant());
    }

    #[test]
    fn invariant_displays() {
        let err = EventStoreError::TurnAlreadyFinalized {
            conversation: 3,
            turn: 2,
        };
        assert_eq!(
            err.to_string(),
            "turn 2 of conversation 3 is already finalized"
        );
        assert!(err.is_invariant());

        let err = EventStoreError::InvalidFinality {
            event_type: EventType::Trace,
        };
        assert_eq!(err.to_string(), "trace events cannot carry finality");
    }

    #[test]
    fn migration_error_display() {
        let err = EventStoreError::Migration {
            message: "v001 failed".into(),
        };
        assert_eq!(err.to_string(), "migration error: v001 failed");
    }
}
