//! Runtime error types.

use parley_core::EventType;
use parley_events::EventStoreError;

/// Errors surfaced by the orchestrator and its helpers.
///
/// Store invariant violations are lifted into the same-named variants so
/// callers never have to reach into [`EventStoreError`] to decide whether to
/// re-sync.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Infrastructure failure from the event log.
    #[error("Store error: {0}")]
    Store(EventStoreError),

    /// Write after the conversation was closed.
    #[error("Conversation finalized: {0}")]
    ConversationFinalized(i64),

    /// Write to a turn that already has a closing message.
    #[error("Turn already finalized: conversation {conversation}, turn {turn}")]
    TurnAlreadyFinalized {
        /// Conversation id.
        conversation: i64,
        /// Closed turn.
        turn: i64,
    },

    /// Write to a turn that is not the one currently accepting events.
    #[error("Turn not open: conversation {conversation}, turn {turn} (expected {expected})")]
    TurnNotOpen {
        /// Conversation id.
        conversation: i64,
        /// Requested turn.
        turn: i64,
        /// Turn the head says is writable.
        expected: i64,
    },

    /// Turn number that can never be valid here.
    #[error("Invalid turn number: conversation {conversation}: {reason}")]
    InvalidTurnNumber {
        /// Conversation id.
        conversation: i64,
        /// What was wrong with it.
        reason: String,
    },

    /// Finality on a non-message event.
    #[error("Invalid finality: {0} events cannot close anything")]
    InvalidFinality(EventType),

    /// Malformed inline attachment.
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),

    /// Conversation metadata rejected at creation.
    #[error("Config error: {0}")]
    Config(String),

    /// Conversation not found.
    #[error("Conversation not found: {0}")]
    ConversationNotFound(i64),

    /// Scenario not found.
    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    /// The orchestrator no longer accepts writes.
    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    /// Internal / unexpected error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EventStoreError> for RuntimeError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConversationFinalized { conversation } => {
                Self::ConversationFinalized(conversation)
            }
            EventStoreError::TurnAlreadyFinalized { conversation, turn } => {
                Self::TurnAlreadyFinalized { conversation, turn }
            }
            EventStoreError::InvalidTurnNumber {
                conversation,
                reason,
            } => Self::InvalidTurnNumber {
                conversation,
                reason,
            },
            EventStoreError::InvalidFinality { event_type } => Self::InvalidFinality(event_type),
            EventStoreError::InvalidAttachment(msg) => Self::InvalidAttachment(msg),
            EventStoreError::ConversationNotFound(id) => Self::ConversationNotFound(id),
            EventStoreError::ScenarioNotFound(id) => Self::ScenarioNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl RuntimeError {
    /// Whether the caller is out of sync with the log head and should
    /// re-fetch it before retrying.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            Self::TurnAlreadyFinalized { .. } | Self::TurnNotOpen { .. } | Self::InvalidTurnNumber { .. }
        )
    }

    /// Whether retrying the same request can ever succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(_) => true,
            other => other.requires_resync(),
        }
    }

    /// Error category string for logs and protocol bridges.
    pub fn category(&self) -> &str {
        match self {
            Self::Store(_) => "store",
            Self::ConversationFinalized(_) => "conversation_finalized",
            Self::TurnAlreadyFinalized { .. } => "turn_already_finalized",
            Self::TurnNotOpen { .. } => "turn_not_open",
            Self::InvalidTurnNumber { .. } => "invalid_turn_number",
            Self::InvalidFinality(_) => "invalid_finality",
            Self::InvalidAttachment(_) => "invalid_attachment",
            Self::Config(_) => "config",
            Self::ConversationNotFound(_) => "conversation_not_found",
            Self::ScenarioNotFound(_) => "scenario_not_found",
            Self::ShuttingDown => "shutting_down",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convenience alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;
