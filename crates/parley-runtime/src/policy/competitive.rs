//! Competitive scheduling: the user hands off, competitors race via claims.

use parley_events::EventRow;

use super::{Decision, SchedulingPolicy};
use crate::types::ConversationSnapshot;

/// Participant class that marks the distinguished user.
pub const USER_CLASS: &str = "user";

/// When the user closes a turn, nominate the first competitor in participant
/// order; when a competitor closes, hand back to the user. Which competitor
/// actually answers is settled by turn claims on the emitted guidance.
#[derive(Clone, Copy, Debug, Default)]
pub struct Competitive;

impl Competitive {
    /// `config.userAgentId`, else the first participant of class `user`.
    pub fn user_id(snapshot: &ConversationSnapshot) -> Option<&str> {
        let meta = &snapshot.metadata;
        if let Some(id) = meta.config.user_agent_id.as_deref() {
            return Some(id);
        }
        meta.agents
            .iter()
            .find(|a| a.class.as_deref() == Some(USER_CLASS))
            .map(|a| a.id.as_str())
    }
}

impl SchedulingPolicy for Competitive {
    fn decide(&self, snapshot: &ConversationSnapshot, last_event: &EventRow) -> Decision {
        let Some(user) = Self::user_id(snapshot) else {
            return Decision::None;
        };
        let speaker = last_event.agent_id.as_str();

        if speaker == user {
            return match snapshot.metadata.agents.iter().find(|a| a.id != user) {
                Some(competitor) => Decision::Agent {
                    id: competitor.id.clone(),
                    note: Some("competitive".into()),
                },
                None => Decision::None,
            };
        }

        if snapshot.metadata.participant(speaker).is_some() {
            Decision::agent(user)
        } else {
            Decision::None
        }
    }
}
