//! Structured outcome carried by conversation-closing messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a conversation ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Normal completion.
    #[default]
    Completed,
    /// Stopped by an operator or the watchdog.
    Canceled,
    /// Stopped because something failed.
    Errored,
}

impl OutcomeStatus {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `payload.outcome` of a finality=conversation message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// Terminal status.
    #[serde(default)]
    pub status: OutcomeStatus,
    /// Machine-readable reason (`max_turns`, `idle_timeout`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    /// Reason used when the turn ceiling closes a conversation.
    pub const MAX_TURNS: &'static str = "max_turns";
    /// Reason used when the watchdog reclaims a conversation.
    pub const IDLE_TIMEOUT: &'static str = "idle_timeout";

    /// Outcome with a status and a reason.
    pub fn new(status: OutcomeStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
        }
    }

    /// Completed without a reason.
    pub fn completed() -> Self {
        Self::default()
    }
}
