//! Guidance: the ephemeral "who acts next" notification.
//!
//! Guidance is recomputed from the log and never stored. Its `seq` is the
//! last real seq plus a fractional offset so consumers can order it against
//! the durable event stream without colliding with a real row.

use serde::{Deserialize, Serialize};

/// Offset added to the last committed seq when emitting guidance.
pub const GUIDANCE_SEQ_OFFSET: f64 = 0.1;

/// Whether the named agent opens a new turn or keeps writing the open one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceKind {
    /// Open a fresh turn.
    StartTurn,
    /// Continue the currently open turn.
    ContinueTurn,
}

/// Advisory notification naming the next participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guidance {
    /// Conversation id.
    pub conversation: i64,
    /// Agent expected to act.
    pub next_agent_id: String,
    /// Start or continue.
    pub kind: GuidanceKind,
    /// Turn the guidance concerns.
    pub turn: i64,
    /// Fractional ordering key (`last seq + 0.1`).
    pub seq: f64,
    /// RFC 3339 action deadline.
    pub deadline: String,
    /// Optional policy note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Guidance {
    /// Fractional guidance seq derived from the last committed seq.
    pub fn seq_after(last_seq: i64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let base = last_seq as f64;
        base + GUIDANCE_SEQ_OFFSET
    }

    /// Whether two guidances name the same action (ignores seq and deadline).
    pub fn same_action(&self, other: &Self) -> bool {
        self.conversation == other.conversation
            && self.next_agent_id == other.next_agent_id
            && self.kind == other.kind
            && self.turn == other.turn
    }
}
