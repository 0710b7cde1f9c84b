//! End-to-end coordination scenarios through the orchestrator.

#![allow(unused_results)]

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::json;

use parley_core::{
    ConversationConfig, ConversationMeta, ConversationStatus, EventType, Finality, GuidanceKind,
    Participant, PolicyKind,
};
use parley_events::{AppendEvent, EventStore};
use parley_runtime::{BusEvent, Listener, Orchestrator, RuntimeError, Watchdog};
use parley_settings::{OrchestratorSettings, WatchdogSettings};

fn orchestrator() -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        Arc::new(EventStore::in_memory().unwrap()),
        OrchestratorSettings::default(),
    ))
}

fn ab_meta() -> ConversationMeta {
    ConversationMeta {
        title: Some("a/b".into()),
        agents: vec![Participant::internal("A"), Participant::external("B")],
        starting_agent_id: Some("A".into()),
        ..ConversationMeta::default()
    }
}

fn collect(orch: &Orchestrator, conversation: i64) -> Arc<Mutex<Vec<BusEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: Listener = Arc::new(move |item: &BusEvent| sink.lock().push(item.clone()));
    orch.subscribe(conversation, listener, true);
    seen.lock().clear();
    seen
}

fn guidance_items(seen: &Mutex<Vec<BusEvent>>) -> Vec<parley_core::Guidance> {
    seen.lock()
        .iter()
        .filter_map(|item| match item {
            BusEvent::Guidance(g) => Some(g.clone()),
            BusEvent::Event(_) => None,
        })
        .collect()
}

#[test]
fn alternation_runs_to_completion() {
    let orch = orchestrator();
    let id = orch.create_conversation(ab_meta()).unwrap().id;
    let seen = collect(&orch, id);

    orch.send_message(id, 1, "A", json!({"text": "hello B"}), Finality::Turn)
        .unwrap();
    let guidance = guidance_items(&seen);
    assert_eq!(guidance.len(), 1);
    assert_eq!(guidance[0].next_agent_id, "B");
    assert_eq!(guidance[0].turn, 2);
    assert_eq!(guidance[0].kind, GuidanceKind::StartTurn);

    orch.send_message(id, 2, "B", json!({"text": "goodbye"}), Finality::Conversation)
        .unwrap();
    assert_eq!(guidance_items(&seen).len(), 1);

    let snapshot = orch.get_conversation_snapshot(id).unwrap();
    assert_eq!(snapshot.status, ConversationStatus::Completed);
    assert_eq!(snapshot.last_closed_seq, 3);
    assert!(orch.get_guidance_snapshot(id).unwrap().is_none());
}

#[test]
fn completed_conversation_rejects_every_type() {
    let orch = orchestrator();
    let id = orch.create_conversation(ab_meta()).unwrap().id;
    orch.send_message(id, 1, "A", json!({}), Finality::Conversation)
        .unwrap();

    assert_matches!(
        orch.append_event(&AppendEvent::system(id, "system", json!({"note": "late"}))),
        Err(RuntimeError::ConversationFinalized(_))
    );
    assert_matches!(
        orch.append_event(&AppendEvent::trace(id, "B", json!({})).in_turn(2)),
        Err(RuntimeError::ConversationFinalized(_))
    );
    assert_eq!(orch.store().get_events(id).unwrap().len(), 2);
}

#[test]
fn trace_with_finality_is_rejected_before_write() {
    let orch = orchestrator();
    let id = orch.create_conversation(ab_meta()).unwrap().id;
    let seen = collect(&orch, id);

    let err = orch
        .append_event(
            &AppendEvent::trace(id, "A", json!({"step": 1}))
                .in_turn(1)
                .with_finality(Finality::Turn),
        )
        .unwrap_err();
    assert_matches!(err, RuntimeError::InvalidFinality(EventType::Trace));
    assert_eq!(orch.store().get_events(id).unwrap().len(), 1);
    assert!(seen.lock().is_empty());
}

#[test]
fn max_turns_closes_the_conversation() {
    let orch = orchestrator();
    let mut meta = ab_meta();
    meta.config = ConversationConfig {
        max_turns: Some(3),
        ..ConversationConfig::default()
    };
    let id = orch.create_conversation(meta).unwrap().id;
    let seen = collect(&orch, id);

    orch.send_message(id, 1, "A", json!({"text": "1"}), Finality::Turn).unwrap();
    orch.send_message(id, 2, "B", json!({"text": "2"}), Finality::Turn).unwrap();
    assert_eq!(guidance_items(&seen).len(), 2);

    orch.send_message(id, 3, "A", json!({"text": "3"}), Finality::Turn).unwrap();
    assert_eq!(guidance_items(&seen).len(), 2, "no guidance after the ceiling");

    let events = orch.store().get_events(id).unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.agent_id, "system");
    assert_eq!(last.event_type, EventType::Message);
    assert_eq!(last.finality, Finality::Conversation);
    assert_eq!(last.turn, 4);
    assert_eq!(last.payload["outcome"]["reason"], "max_turns");
    assert_eq!(last.payload["outcome"]["status"], "completed");

    let published_rows = seen
        .lock()
        .iter()
        .filter(|item| matches!(item, BusEvent::Event(_)))
        .count();
    assert_eq!(published_rows, 4);
    assert_eq!(
        orch.get_conversation(id).unwrap().unwrap().status,
        ConversationStatus::Completed
    );
}

#[test]
fn guidance_snapshot_is_deterministic() {
    let orch = orchestrator();
    let id = orch.create_conversation(ab_meta()).unwrap().id;
    orch.send_message(id, 1, "A", json!({}), Finality::Turn).unwrap();
    orch.send_trace(id, 2, "B", json!({"thinking": true})).unwrap();

    let first = orch.get_guidance_snapshot(id).unwrap().unwrap();
    let second = orch.get_guidance_snapshot(id).unwrap().unwrap();
    assert_eq!(first.next_agent_id, second.next_agent_id);
    assert_eq!(first.kind, second.kind);
    assert_eq!(first.turn, second.turn);
    assert_eq!(first.kind, GuidanceKind::ContinueTurn);
    assert_eq!(first.next_agent_id, "B");
}

#[test]
fn idempotent_replay_is_not_republished() {
    let orch = orchestrator();
    let id = orch.create_conversation(ab_meta()).unwrap().id;
    let seen = collect(&orch, id);
    let payload = json!({"text": "once", "clientRequestId": "req-7"});

    let first = orch
        .send_message(id, 1, "A", payload.clone(), Finality::None)
        .unwrap();
    let second = orch
        .send_message(id, 1, "A", payload, Finality::None)
        .unwrap();
    assert_eq!((first.turn, first.event, first.seq), (second.turn, second.event, second.seq));
    assert_eq!(orch.store().get_events(id).unwrap().len(), 2);
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn attachments_are_stored_by_reference() {
    let orch = orchestrator();
    let id = orch.create_conversation(ab_meta()).unwrap().id;
    let result = orch
        .send_message(
            id,
            1,
            "A",
            json!({
                "text": "see attached",
                "attachments": [
                    {"name": "notes.md", "contentType": "text/markdown", "content": "# notes"},
                    {"name": "data.csv", "content": "a,b\n1,2", "docId": "dataset"}
                ]
            }),
            Finality::Turn,
        )
        .unwrap();

    let row = orch.store().get_event_by_seq(id, result.seq).unwrap().unwrap();
    let refs = row.payload["attachments"].as_array().unwrap();
    assert_eq!(refs.len(), 2);
    for r in refs {
        assert!(r.get("content").is_none());
        assert!(r.get("id").is_some());
    }
    assert_eq!(orch.list_attachments(id).unwrap().len(), 2);
    let csv = orch.get_attachment_by_doc_id(id, "dataset").unwrap().unwrap();
    assert_eq!(csv.content, "a,b\n1,2");
}

#[test]
fn competitive_guidance_is_claimed_once() {
    let orch = orchestrator();
    let meta = ConversationMeta {
        agents: vec![
            Participant::external("user").with_class("user"),
            Participant::internal("fast"),
            Participant::internal("slow"),
        ],
        config: ConversationConfig {
            policy: Some(PolicyKind::Competitive),
            ..ConversationConfig::default()
        },
        ..ConversationMeta::default()
    };
    let id = orch.create_conversation(meta).unwrap().id;
    let seen = collect(&orch, id);

    orch.send_message(id, 1, "user", json!({"text": "who answers?"}), Finality::Turn)
        .unwrap();
    let guidance = guidance_items(&seen);
    assert_eq!(guidance.len(), 1);
    assert_eq!(guidance[0].next_agent_id, "fast");

    let seq = guidance[0].seq;
    assert!(orch.claim_turn(id, seq, "slow").unwrap());
    assert!(!orch.claim_turn(id, seq, "fast").unwrap());
    assert!(!orch.claim_turn(id, seq, "slow").unwrap());

    orch.send_message(id, 2, "slow", json!({"text": "me"}), Finality::Turn)
        .unwrap();
    let back = guidance_items(&seen);
    assert_eq!(back.last().unwrap().next_agent_id, "user");
}

#[test]
fn pushed_and_pulled_guidance_share_a_claim_key() {
    let orch = orchestrator();
    let meta = ConversationMeta {
        agents: vec![
            Participant::external("user").with_class("user"),
            Participant::internal("fast"),
            Participant::internal("slow"),
        ],
        config: ConversationConfig {
            policy: Some(PolicyKind::Competitive),
            ..ConversationConfig::default()
        },
        ..ConversationMeta::default()
    };
    let id = orch.create_conversation(meta).unwrap().id;
    let seen = collect(&orch, id);

    orch.send_message(id, 1, "user", json!({"text": "anyone?"}), Finality::Turn)
        .unwrap();
    orch.append_event(&AppendEvent::system(id, "system", json!({"note": "audit"})))
        .unwrap();

    let pushed = guidance_items(&seen).pop().unwrap();
    let pulled = orch.get_guidance_snapshot(id).unwrap().unwrap();
    assert_eq!(pushed.turn, pulled.turn);
    assert!((pushed.seq - pulled.seq).abs() < 1e-9);

    assert!(orch.claim_turn(id, pushed.seq, "fast").unwrap());
    assert!(!orch.claim_turn(id, pulled.seq, "slow").unwrap());
}

#[test]
fn watchdog_cancels_at_most_the_cap() {
    let orch = orchestrator();
    let settings = WatchdogSettings {
        max_cancellations_per_run: 10,
        ..WatchdogSettings::default()
    };
    let dog = Watchdog::new(Arc::clone(&orch), settings);
    for _ in 0..15 {
        orch.create_conversation(ab_meta()).unwrap();
    }

    let later = Utc::now() + ChronoDuration::hours(2);
    let first = dog.run_once_at(later);
    assert_eq!(first.examined, 15);
    assert_eq!(first.canceled.len(), 10);
    assert_eq!(first.deferred, 5);
    assert!(first.failed.is_empty());
    assert_eq!(
        orch.list_conversations(Some(ConversationStatus::Active))
            .unwrap()
            .len(),
        5
    );

    let second = dog.run_once_at(later);
    assert_eq!(second.canceled.len(), 5);
    assert_eq!(dog.stats().canceled, 15);
}

#[test]
fn watchdog_measures_from_last_closing_event() {
    let orch = orchestrator();
    let dog = Watchdog::new(
        Arc::clone(&orch),
        WatchdogSettings {
            min_age_ms: 0,
            stall_threshold_ms: 60_000,
            ..WatchdogSettings::default()
        },
    );
    let id = orch.create_conversation(ab_meta()).unwrap().id;
    orch.send_message(id, 1, "A", json!({}), Finality::Turn).unwrap();

    let soon = Utc::now() + ChronoDuration::seconds(30);
    assert!(dog.run_once_at(soon).canceled.is_empty());
    let late = Utc::now() + ChronoDuration::minutes(5);
    assert_eq!(dog.run_once_at(late).canceled, vec![id]);
}
