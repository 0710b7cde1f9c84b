//! Scheduling policies: who speaks after a turn closes.
//!
//! A policy is a pure function of the conversation snapshot and the message
//! that just closed a turn. It never writes; the orchestrator turns a
//! [`Decision::Agent`] into `start_turn` guidance.

pub mod alternation;
pub mod competitive;
pub mod scenario;

use std::collections::HashMap;
use std::sync::Arc;

use parley_core::PolicyKind;
use parley_events::EventRow;

use crate::types::ConversationSnapshot;

pub use alternation::StrictAlternation;
pub use competitive::Competitive;
pub use scenario::ScenarioDriven;

/// Outcome of a policy decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Nobody is scheduled.
    None,
    /// The named agent should open the next turn.
    Agent {
        /// Agent id.
        id: String,
        /// Optional note forwarded on the guidance.
        note: Option<String>,
    },
}

impl Decision {
    /// Decision naming `id` without a note.
    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent {
            id: id.into(),
            note: None,
        }
    }
}

/// Decides the next speaker after a turn-closing message.
pub trait SchedulingPolicy: Send + Sync {
    /// Only called when `last_event` is a message with finality turn or
    /// conversation.
    fn decide(&self, snapshot: &ConversationSnapshot, last_event: &EventRow) -> Decision;
}

/// Round-robin step shared by the alternation-style policies.
pub(crate) fn next_in_rotation(order: &[&str], speaker: &str) -> Option<String> {
    if order.len() < 2 {
        return None;
    }
    let idx = order.iter().position(|id| *id == speaker)?;
    Some(order[(idx + 1) % order.len()].to_string())
}

/// Policy table keyed by [`PolicyKind`].
#[derive(Clone)]
pub struct PolicySet {
    policies: HashMap<PolicyKind, Arc<dyn SchedulingPolicy>>,
}

impl Default for PolicySet {
    fn default() -> Self {
        let mut policies: HashMap<PolicyKind, Arc<dyn SchedulingPolicy>> = HashMap::new();
        let _ = policies.insert(PolicyKind::StrictAlternation, Arc::new(StrictAlternation));
        let _ = policies.insert(PolicyKind::Scenario, Arc::new(ScenarioDriven));
        let _ = policies.insert(PolicyKind::Competitive, Arc::new(Competitive));
        Self { policies }
    }
}

impl PolicySet {
    /// Replace the implementation used for `kind`.
    pub fn set(&mut self, kind: PolicyKind, policy: Arc<dyn SchedulingPolicy>) {
        let _ = self.policies.insert(kind, policy);
    }

    /// Policy for `kind`, falling back to strict alternation.
    pub fn get(&self, kind: PolicyKind) -> Arc<dyn SchedulingPolicy> {
        match self.policies.get(&kind) {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(StrictAlternation),
        }
    }
}
