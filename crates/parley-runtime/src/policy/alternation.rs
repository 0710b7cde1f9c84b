//! Strict alternation over metadata participants.

use parley_events::EventRow;

use super::{Decision, SchedulingPolicy, next_in_rotation};
use crate::types::ConversationSnapshot;

/// Next speaker is the participant after the last one, wrapping around.
#[derive(Clone, Copy, Debug, Default)]
pub struct StrictAlternation;

impl SchedulingPolicy for StrictAlternation {
    fn decide(&self, snapshot: &ConversationSnapshot, last_event: &EventRow) -> Decision {
        let order = snapshot.metadata.participant_ids();
        match next_in_rotation(&order, &last_event.agent_id) {
            Some(id) => Decision::agent(id),
            None => Decision::None,
        }
    }
}
