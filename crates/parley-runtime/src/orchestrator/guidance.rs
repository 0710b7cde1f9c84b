//! Guidance computation.
//!
//! Guidance is always derived from the log at call time. The post-write path
//! and the pull path share [`Orchestrator::decide`], so both name the same
//! agent for the same log state.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};

use parley_core::{EventType, Guidance, GuidanceKind};
use parley_events::EventRow;

use crate::bus::panic_message;
use crate::errors::Result;
use crate::orchestrator::Orchestrator;
use crate::policy::Decision;
use crate::types::ConversationSnapshot;

impl Orchestrator {
    /// Who should act right now. `None` once the conversation is completed,
    /// or when nobody is scheduled.
    ///
    /// - no turns yet: `start_turn` for the configured starting agent
    /// - open turn: `continue_turn` for the latest non-system author
    /// - closed turn: `start_turn` for whoever the policy names
    pub fn get_guidance_snapshot(&self, conversation: i64) -> Result<Option<Guidance>> {
        let snapshot = self.get_conversation_snapshot(conversation)?;
        if snapshot.is_completed() {
            return Ok(None);
        }
        let head = self.store.get_head(conversation)?;

        // `start_turn` seq follows the event that made the turn available;
        // pushed and pulled guidance must agree on it.
        if head.last_turn == 0 {
            let seq = Guidance::seq_after(snapshot.events.first().map_or(0, |e| e.seq));
            return Ok(snapshot.metadata.starting_agent_id.clone().map(|starter| {
                self.guidance(conversation, starter, GuidanceKind::StartTurn, 1, seq, None)
            }));
        }

        if head.has_open_turn {
            let seq = Guidance::seq_after(snapshot.events.last().map_or(0, |e| e.seq));
            let owner = snapshot
                .events
                .iter()
                .rev()
                .find(|e| e.event_type != EventType::System)
                .map(|e| e.agent_id.clone());
            return Ok(owner.map(|owner| {
                self.guidance(
                    conversation,
                    owner,
                    GuidanceKind::ContinueTurn,
                    head.last_turn,
                    seq,
                    None,
                )
            }));
        }

        let Some(closing) = snapshot.events.iter().rev().find(|e| e.closes_turn()) else {
            return Ok(None);
        };
        Ok(match self.decide(&snapshot, closing) {
            Decision::None => None,
            Decision::Agent { id, note } => Some(self.guidance(
                conversation,
                id,
                GuidanceKind::StartTurn,
                head.last_turn + 1,
                Guidance::seq_after(closing.seq),
                note,
            )),
        })
    }

    /// Publish `start_turn` guidance for the turn after `closing`. Failures
    /// are logged and swallowed; the write has already committed.
    pub(crate) fn emit_guidance_after(&self, closing: &EventRow) {
        let conversation = closing.conversation;
        let snapshot = match self.get_conversation_snapshot(conversation) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(conversation, error = %err, "guidance skipped: snapshot failed");
                return;
            }
        };
        if snapshot.is_completed() {
            return;
        }

        let Decision::Agent { id, note } = self.decide(&snapshot, closing) else {
            debug!(conversation, turn = closing.turn, "policy scheduled nobody");
            return;
        };
        let guidance = self.guidance(
            conversation,
            id,
            GuidanceKind::StartTurn,
            closing.turn + 1,
            Guidance::seq_after(closing.seq),
            note,
        );
        let delivered = self.bus.publish_guidance(&guidance);
        debug!(
            conversation,
            next_agent_id = %guidance.next_agent_id,
            turn = guidance.turn,
            delivered,
            "guidance published"
        );
    }

    /// Run the conversation's policy. A panicking policy schedules nobody.
    pub(crate) fn decide(&self, snapshot: &ConversationSnapshot, last_event: &EventRow) -> Decision {
        let kind = snapshot.metadata.effective_policy();
        let policy = self.policies.get(kind);
        match catch_unwind(AssertUnwindSafe(|| policy.decide(snapshot, last_event))) {
            Ok(decision) => decision,
            Err(panic) => {
                warn!(
                    conversation = snapshot.conversation,
                    policy = ?kind,
                    error = %panic_message(panic.as_ref()),
                    "scheduling policy panicked"
                );
                Decision::None
            }
        }
    }

    fn guidance(
        &self,
        conversation: i64,
        next_agent_id: String,
        kind: GuidanceKind,
        turn: i64,
        seq: f64,
        note: Option<String>,
    ) -> Guidance {
        Guidance {
            conversation,
            next_agent_id,
            kind,
            turn,
            seq,
            deadline: self.deadline(),
            note,
        }
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use std::sync::Arc;

    use parley_core::{ConversationMeta, Finality, Participant, PolicyKind};
    use parley_events::{AppendEvent, EventStore};
    use parley_settings::OrchestratorSettings;
    use serde_json::json;

    use crate::errors::RuntimeError;
    use crate::policy::{PolicySet, SchedulingPolicy};

    use super::*;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(EventStore::in_memory().unwrap()),
            OrchestratorSettings::default(),
        )
    }

    fn meta(starter: Option<&str>) -> ConversationMeta {
        ConversationMeta {
            agents: vec![Participant::internal("a"), Participant::external("b")],
            starting_agent_id: starter.map(str::to_string),
            ..ConversationMeta::default()
        }
    }

    #[test]
    fn starter_before_any_turn() {
        let orch = orchestrator();
        let id = orch.create_conversation(meta(Some("a"))).unwrap().id;
        let g = orch.get_guidance_snapshot(id).unwrap().unwrap();
        assert_eq!(g.next_agent_id, "a");
        assert_eq!(g.kind, GuidanceKind::StartTurn);
        assert_eq!(g.turn, 1);
        assert!((g.seq - 1.1).abs() < 1e-9);

        let quiet = orch.create_conversation(meta(None)).unwrap().id;
        assert!(orch.get_guidance_snapshot(quiet).unwrap().is_none());
    }

    #[test]
    fn open_turn_continues_with_last_author() {
        let orch = orchestrator();
        let id = orch.create_conversation(meta(Some("a"))).unwrap().id;
        orch.send_trace(id, 1, "a", json!({"thinking": true})).unwrap();
        let g = orch.get_guidance_snapshot(id).unwrap().unwrap();
        assert_eq!(g.kind, GuidanceKind::ContinueTurn);
        assert_eq!(g.next_agent_id, "a");
        assert_eq!(g.turn, 1);
    }

    #[test]
    fn closed_turn_asks_policy() {
        let orch = orchestrator();
        let id = orch.create_conversation(meta(Some("a"))).unwrap().id;
        orch.send_message(id, 1, "a", json!({"text": "hi"}), Finality::Turn)
            .unwrap();
        let first = orch.get_guidance_snapshot(id).unwrap().unwrap();
        let second = orch.get_guidance_snapshot(id).unwrap().unwrap();
        assert_eq!(first.next_agent_id, "b");
        assert_eq!(first.turn, 2);
        assert!(first.same_action(&second));
    }

    #[test]
    fn system_events_do_not_move_start_turn_seq() {
        let orch = orchestrator();
        let id = orch.create_conversation(meta(Some("a"))).unwrap().id;
        orch.append_event(&AppendEvent::system(id, "system", json!({"note": "warmup"})))
            .unwrap();
        let opening = orch.get_guidance_snapshot(id).unwrap().unwrap();
        assert!((opening.seq - 1.1).abs() < 1e-9);

        let closed = orch
            .send_message(id, 1, "a", json!({"text": "hi"}), Finality::Turn)
            .unwrap();
        orch.append_event(&AppendEvent::system(id, "system", json!({"note": "audit"})))
            .unwrap();
        let next = orch.get_guidance_snapshot(id).unwrap().unwrap();
        assert_eq!(next.turn, 2);
        assert!((next.seq - Guidance::seq_after(closed.seq)).abs() < 1e-9);
    }

    #[test]
    fn missing_conversation_is_an_error() {
        let orch = orchestrator();
        assert!(matches!(
            orch.get_guidance_snapshot(42),
            Err(RuntimeError::ConversationNotFound(42))
        ));
    }

    struct Panics;

    impl SchedulingPolicy for Panics {
        fn decide(&self, snapshot: &ConversationSnapshot, _: &EventRow) -> Decision {
            if snapshot.conversation > 0 {
                panic!("policy bug");
            }
            Decision::None
        }
    }

    #[test]
    fn panicking_policy_does_not_block_writes() {
        let mut policies = PolicySet::default();
        policies.set(PolicyKind::StrictAlternation, Arc::new(Panics));
        let orch = orchestrator().with_policies(policies);
        let id = orch.create_conversation(meta(Some("a"))).unwrap().id;

        let result = orch
            .send_message(id, 1, "a", json!({"text": "hi"}), Finality::Turn)
            .unwrap();
        assert_eq!(result.turn, 1);
        assert!(orch.get_guidance_snapshot(id).unwrap().is_none());
    }
}
