//! Subscriptions and the two suspending reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use parley_core::ConversationStatus;
use parley_core::constants::ALL_CONVERSATIONS;
use parley_events::EventRow;

use crate::bus::{BusEvent, Delivery, Listener, SubscriptionBus, SubscriptionFilter, SubscriptionId};
use crate::errors::Result;
use crate::orchestrator::Orchestrator;
use crate::types::WaitOutcome;

/// Unsubscribes when dropped.
struct SubscriptionGuard<'a> {
    bus: &'a SubscriptionBus,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        let _ = self.bus.unsubscribe(self.id);
    }
}

impl Orchestrator {
    /// Listen to one conversation, optionally with guidance.
    pub fn subscribe(
        &self,
        conversation: i64,
        listener: Listener,
        include_guidance: bool,
    ) -> SubscriptionId {
        let delivery = if include_guidance {
            Delivery::EventsAndGuidance
        } else {
            Delivery::Events
        };
        self.subscribe_with_filter(SubscriptionFilter::conversation(conversation), delivery, listener)
    }

    /// Listen to every conversation.
    pub fn subscribe_all(&self, listener: Listener, include_guidance: bool) -> SubscriptionId {
        self.subscribe(ALL_CONVERSATIONS, listener, include_guidance)
    }

    /// Listen with an explicit filter. When guidance is requested for a
    /// single conversation, the current guidance is delivered immediately.
    pub fn subscribe_with_filter(
        &self,
        filter: SubscriptionFilter,
        delivery: Delivery,
        listener: Listener,
    ) -> SubscriptionId {
        let conversation = filter.conversation;
        let id = self.bus.subscribe(filter, delivery, listener);
        if delivery == Delivery::Events || conversation == ALL_CONVERSATIONS {
            return id;
        }
        match self.get_guidance_snapshot(conversation) {
            Ok(Some(guidance)) => {
                let _ = self.bus.deliver(id, &BusEvent::Guidance(guidance));
            }
            Ok(None) => {}
            Err(err) => debug!(conversation, error = %err, "no initial guidance"),
        }
        id
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Wait until guidance names `agent_id`, the conversation completes, or
    /// `timeout` elapses.
    pub async fn wait_for_turn(
        &self,
        conversation: i64,
        agent_id: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        let (tx, mut rx) = mpsc::unbounded_channel::<BusEvent>();
        let listener: Listener = Arc::new(move |item: &BusEvent| {
            let _ = tx.send(item.clone());
        });
        let id = self.subscribe_with_filter(
            SubscriptionFilter::conversation(conversation),
            Delivery::EventsAndGuidance,
            listener,
        );
        let _guard = SubscriptionGuard { bus: &self.bus, id };

        if let Some(row) = self.store.get_conversation(conversation)? {
            if row.status == ConversationStatus::Completed {
                return Ok(WaitOutcome::Completed);
            }
        }

        let wait = async {
            while let Some(item) = rx.recv().await {
                match item {
                    BusEvent::Guidance(g) if g.next_agent_id == agent_id => {
                        return WaitOutcome::Turn(g);
                    }
                    BusEvent::Event(row) if row.closes_conversation() => {
                        return WaitOutcome::Completed;
                    }
                    _ => {}
                }
            }
            WaitOutcome::TimedOut
        };
        Ok(tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(WaitOutcome::TimedOut))
    }

    /// Long-poll: events with `seq > since`, waiting up to `timeout` for the
    /// first one when there are none yet. An empty result means timeout.
    pub async fn wait_for_updates(
        &self,
        conversation: i64,
        since: i64,
        timeout: Duration,
    ) -> Result<Vec<EventRow>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let listener: Listener = Arc::new(move |_: &BusEvent| {
            let _ = tx.send(());
        });
        let id = self.bus.subscribe(
            SubscriptionFilter::conversation(conversation),
            Delivery::Events,
            listener,
        );
        let _guard = SubscriptionGuard { bus: &self.bus, id };

        let events = self.store.get_events_since(conversation, since)?;
        if !events.is_empty() {
            return Ok(events);
        }
        let _ = tokio::time::timeout(timeout, rx.recv()).await;
        Ok(self.store.get_events_since(conversation, since)?)
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use parley_core::{ConversationMeta, Finality, GuidanceKind, Participant};
    use parley_events::EventStore;
    use parley_settings::OrchestratorSettings;
    use serde_json::json;

    fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            Arc::new(EventStore::in_memory().unwrap()),
            OrchestratorSettings::default(),
        ))
    }

    fn pair() -> ConversationMeta {
        ConversationMeta {
            agents: vec![Participant::internal("a"), Participant::internal("b")],
            starting_agent_id: Some("a".into()),
            ..ConversationMeta::default()
        }
    }

    fn collector() -> (Arc<Mutex<Vec<BusEvent>>>, Listener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener = Arc::new(move |item: &BusEvent| sink.lock().push(item.clone()));
        (seen, listener)
    }

    #[test]
    fn guidance_subscription_gets_immediate_snapshot() {
        let orch = orchestrator();
        let id = orch.create_conversation(pair()).unwrap().id;

        let (seen, listener) = collector();
        orch.subscribe(id, listener, true);
        let items = seen.lock().clone();
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            BusEvent::Guidance(g) if g.next_agent_id == "a" && g.kind == GuidanceKind::StartTurn
        ));

        let (plain, listener) = collector();
        orch.subscribe(id, listener, false);
        assert!(plain.lock().is_empty());
    }

    #[test]
    fn closing_publishes_row_then_guidance() {
        let orch = orchestrator();
        let id = orch.create_conversation(pair()).unwrap().id;
        let (seen, listener) = collector();
        let sub = orch.subscribe(id, listener, true);
        seen.lock().clear();

        orch.send_message(id, 1, "a", json!({"text": "hi"}), Finality::Turn)
            .unwrap();
        let items = seen.lock().clone();
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], BusEvent::Event(row) if row.seq == 2));
        assert!(matches!(
            &items[1],
            BusEvent::Guidance(g) if g.next_agent_id == "b" && g.turn == 2
        ));

        assert!(orch.unsubscribe(sub));
        orch.send_trace(id, 2, "b", json!({})).unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn wait_for_turn_resolves_on_guidance() {
        let orch = orchestrator();
        let id = orch.create_conversation(pair()).unwrap().id;

        let writer = Arc::clone(&orch);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .send_message(id, 1, "a", json!({"text": "over to b"}), Finality::Turn)
                .unwrap();
        });

        let outcome = orch
            .wait_for_turn(id, "b", Duration::from_secs(5))
            .await
            .unwrap();
        handle.await.unwrap();
        match outcome {
            WaitOutcome::Turn(g) => assert_eq!(g.turn, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(orch.bus().is_empty());
    }

    #[tokio::test]
    async fn wait_for_turn_sees_current_guidance() {
        let orch = orchestrator();
        let id = orch.create_conversation(pair()).unwrap().id;
        let outcome = orch
            .wait_for_turn(id, "a", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Turn(g) if g.turn == 1));
    }

    #[tokio::test]
    async fn wait_for_turn_times_out_and_completes() {
        let orch = orchestrator();
        let id = orch.create_conversation(pair()).unwrap().id;
        let outcome = orch
            .wait_for_turn(id, "b", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);

        orch.send_message(id, 1, "a", json!({}), Finality::Conversation)
            .unwrap();
        let outcome = orch
            .wait_for_turn(id, "b", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Completed);
    }

    #[tokio::test]
    async fn wait_for_updates_long_polls() {
        let orch = orchestrator();
        let id = orch.create_conversation(pair()).unwrap().id;

        let ready = orch
            .wait_for_updates(id, 0, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(ready.len(), 1);

        let empty = orch
            .wait_for_updates(id, 1, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(empty.is_empty());

        let writer = Arc::clone(&orch);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.send_trace(id, 1, "a", json!({"n": 1})).unwrap();
        });
        let fresh = orch
            .wait_for_updates(id, 1, Duration::from_secs(5))
            .await
            .unwrap();
        handle.await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].seq, 2);
    }
}
