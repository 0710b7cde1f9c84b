//! Conversation status and metadata.
//!
//! Metadata is stored as a JSON blob on the conversation row. All field
//! names are camelCase; unknown fields land in `custom` untouched so
//! protocol bridges can stash their own state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::ParseEnumError;

/// Lifecycle of a conversation. `Completed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Accepting events.
    Active,
    /// Closed by a finality=conversation message.
    Completed,
}

impl ConversationStatus {
    /// Wire/storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = ParseEnumError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(ParseEnumError {
                kind: "conversation status",
                value: other.to_string(),
            }),
        }
    }
}

/// Where a participant runs relative to this process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    /// Driven by an in-process executor.
    #[default]
    Internal,
    /// Driven from outside (protocol bridge, human client).
    External,
}

/// One participant of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Agent id, unique within the conversation.
    pub id: String,
    /// Internal or external.
    #[serde(default)]
    pub kind: ParticipantKind,
    /// Free-form role label (`user`, `competitor`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

impl Participant {
    /// Internal participant without a class.
    pub fn internal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ParticipantKind::Internal,
            class: None,
        }
    }

    /// External participant without a class.
    pub fn external(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ParticipantKind::External,
            class: None,
        }
    }

    /// Builder-style class assignment.
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }
}

/// Which scheduling policy decides the next speaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Round-robin over metadata participants.
    StrictAlternation,
    /// Round-robin over the bound scenario's agents.
    Scenario,
    /// User hands off to one competitor; ownership via turn claims.
    Competitive,
}

/// Per-conversation limits and switches. Unset values fall back to settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationConfig {
    /// Turn ceiling before the engine closes the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Inactivity window before the watchdog cancels the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    /// Opt out of watchdog reclamation entirely.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_idle_timeout: bool,
    /// Explicit policy; derived from the scenario binding when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyKind>,
    /// Distinguished user participant for competitive scheduling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent_id: Option<String>,
}

/// Metadata blob attached to every conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationMeta {
    /// Display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Longer description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Bound scenario, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    /// Participants in scheduling order.
    pub agents: Vec<Participant>,
    /// Agent that receives guidance for turn 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_agent_id: Option<String>,
    /// Limits and switches.
    pub config: ConversationConfig,
    /// Caller-owned fields, round-tripped verbatim.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub custom: Value,
}

impl ConversationMeta {
    /// Participant ids in scheduling order.
    pub fn participant_ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.id.as_str()).collect()
    }

    /// Look up a participant by id.
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Policy to use for this conversation.
    pub fn effective_policy(&self) -> PolicyKind {
        match (self.config.policy, &self.scenario_id) {
            (Some(kind), _) => kind,
            (None, Some(_)) => PolicyKind::Scenario,
            (None, None) => PolicyKind::StrictAlternation,
        }
    }
}
