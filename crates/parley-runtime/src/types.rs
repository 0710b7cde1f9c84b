//! Shared runtime types.

use serde::{Deserialize, Serialize};

use parley_core::{ConversationMeta, ConversationStatus, Guidance, OutcomeStatus, Scenario};
use parley_events::{ConversationRow, EventRow};

/// Point-in-time view of one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    /// Conversation id.
    pub conversation: i64,
    /// Active or completed.
    pub status: ConversationStatus,
    /// Metadata as stored.
    pub metadata: ConversationMeta,
    /// Every event, ordered by seq.
    pub events: Vec<EventRow>,
    /// Seq of the last turn-closing message, 0 if none.
    pub last_closed_seq: i64,
    /// Bound scenario, when metadata names one that exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<Scenario>,
}

impl ConversationSnapshot {
    /// Assemble a snapshot from already-loaded parts.
    pub fn new(
        row: ConversationRow,
        events: Vec<EventRow>,
        last_closed_seq: i64,
        scenario: Option<Scenario>,
    ) -> Self {
        Self {
            conversation: row.id,
            status: row.status,
            metadata: row.metadata,
            events,
            last_closed_seq,
            scenario,
        }
    }

    /// Whether the conversation has been closed.
    pub fn is_completed(&self) -> bool {
        self.status == ConversationStatus::Completed
    }
}

/// How `end_conversation` should close a conversation.
#[derive(Clone, Debug, Default)]
pub struct EndOptions {
    /// Terminal status written to `payload.outcome.status`.
    pub status: OutcomeStatus,
    /// Machine-readable reason.
    pub reason: Option<String>,
    /// Author of the closing message; the system agent when unset.
    pub agent_id: Option<String>,
    /// Human-readable text for the closing message.
    pub text: Option<String>,
}

impl EndOptions {
    /// Close with the given status.
    pub fn with_status(status: OutcomeStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Attach a reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Author the closing message as `agent_id`.
    #[must_use]
    pub fn by(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// How a `wait_for_turn` call resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitOutcome {
    /// Guidance named the waiting agent.
    Turn(Guidance),
    /// The conversation completed first.
    Completed,
    /// Nothing qualifying happened before the deadline.
    TimedOut,
}
