//! Alternation over the bound scenario's roster.

use parley_events::EventRow;

use super::{Decision, SchedulingPolicy, next_in_rotation};
use crate::types::ConversationSnapshot;

/// Round-robin in scenario order; metadata order when no scenario is bound.
/// The next agent's scenario role, if any, is forwarded as the note.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScenarioDriven;

impl SchedulingPolicy for ScenarioDriven {
    fn decide(&self, snapshot: &ConversationSnapshot, last_event: &EventRow) -> Decision {
        let Some(scenario) = &snapshot.scenario else {
            let order = snapshot.metadata.participant_ids();
            return match next_in_rotation(&order, &last_event.agent_id) {
                Some(id) => Decision::agent(id),
                None => Decision::None,
            };
        };

        let order = scenario.agent_ids();
        let Some(next) = next_in_rotation(&order, &last_event.agent_id) else {
            return Decision::None;
        };
        let note = scenario
            .agents
            .iter()
            .find(|a| a.agent_id == next)
            .and_then(|a| a.role.clone());
        Decision::Agent { id: next, note }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::{closing, snapshot};
    use parley_core::{ConversationConfig, Participant, ParticipantKind, Scenario, ScenarioAgent};

    fn seat(id: &str, role: Option<&str>) -> ScenarioAgent {
        ScenarioAgent {
            agent_id: id.into(),
            kind: ParticipantKind::Internal,
            role: role.map(str::to_string),
        }
    }

    #[test]
    fn follows_scenario_order_not_metadata_order() {
        let mut snap = snapshot(
            vec![
                Participant::internal("c"),
                Participant::internal("b"),
                Participant::internal("a"),
            ],
            ConversationConfig::default(),
        );
        snap.scenario = Some(Scenario {
            id: "s".into(),
            name: "S".into(),
            description: None,
            agents: vec![seat("a", None), seat("b", Some("critic")), seat("c", None)],
            config: serde_json::Value::Null,
        });

        assert_eq!(
            ScenarioDriven.decide(&snap, &closing("a", 1)),
            Decision::Agent {
                id: "b".into(),
                note: Some("critic".into())
            }
        );
        assert_eq!(ScenarioDriven.decide(&snap, &closing("c", 3)), Decision::agent("a"));
    }

    #[test]
    fn falls_back_to_metadata() {
        let snap = snapshot(
            vec![Participant::internal("x"), Participant::internal("y")],
            ConversationConfig::default(),
        );
        assert_eq!(ScenarioDriven.decide(&snap, &closing("y", 2)), Decision::agent("x"));
    }
}
