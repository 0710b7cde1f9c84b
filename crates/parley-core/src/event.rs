//! Event kinds and finality markers.
//!
//! Both enums are stored as lowercase text in `SQLite` and travel as the same
//! strings over JSON, so `Display`, `FromStr` and serde all agree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to parse a stored enum column.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending input.
    pub value: String,
}

/// The kind of a log row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Conversational content; the only type that may close a turn.
    Message,
    /// Work-in-progress annotations inside an open turn.
    Trace,
    /// Orchestration metadata on the turn-0 lane.
    System,
}

impl EventType {
    /// Wire/storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Trace => "trace",
            Self::System => "system",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseEnumError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "trace" => Ok(Self::Trace),
            "system" => Ok(Self::System),
            other => Err(ParseEnumError {
                kind: "event type",
                value: other.to_string(),
            }),
        }
    }
}

/// What a message closes, if anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finality {
    /// Continues the current turn.
    #[default]
    None,
    /// Closes the current turn.
    Turn,
    /// Closes the turn and the whole conversation.
    Conversation,
}

impl Finality {
    /// Wire/storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Turn => "turn",
            Self::Conversation => "conversation",
        }
    }

    /// Whether this finality closes the turn it is written in.
    pub fn closes_turn(self) -> bool {
        matches!(self, Self::Turn | Self::Conversation)
    }
}

impl fmt::Display for Finality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Finality {
    type Err = ParseEnumError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "turn" => Ok(Self::Turn),
            "conversation" => Ok(Self::Conversation),
            other => Err(ParseEnumError {
                kind: "finality",
                value: other.to_string(),
            }),
        }
    }
}
