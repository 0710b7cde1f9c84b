//! Live executors attached to conversations.
//!
//! An executor is whatever drives an internal participant (a model loop, a
//! scripted bot). The orchestrator only needs to stop them when a
//! conversation ends or is reclaimed.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::bus::panic_message;

/// Something running on behalf of a participant.
pub trait LiveExecutor: Send + Sync {
    /// Participant the executor acts for.
    fn agent_id(&self) -> &str;

    /// Stop work. Must not block; called on the orchestrator's thread.
    fn stop(&self, reason: &str);
}

/// Executors keyed by conversation.
#[derive(Default)]
pub struct ExecutorRegistry {
    by_conversation: DashMap<i64, Vec<Arc<dyn LiveExecutor>>>,
}

impl ExecutorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an executor. Replaces any executor for the same agent.
    pub fn attach(&self, conversation: i64, executor: Arc<dyn LiveExecutor>) {
        let mut entry = self.by_conversation.entry(conversation).or_default();
        entry.retain(|e| e.agent_id() != executor.agent_id());
        entry.push(executor);
    }

    /// Detach one agent's executor without stopping it.
    pub fn detach(&self, conversation: i64, agent_id: &str) -> bool {
        let Some(mut entry) = self.by_conversation.get_mut(&conversation) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|e| e.agent_id() != agent_id);
        entry.len() != before
    }

    /// Number of executors attached to a conversation.
    pub fn count(&self, conversation: i64) -> usize {
        self.by_conversation
            .get(&conversation)
            .map_or(0, |entry| entry.len())
    }

    /// Remove and stop every executor of a conversation. A panicking
    /// executor is logged; the rest are still stopped.
    pub fn stop_all(&self, conversation: i64, reason: &str) -> usize {
        let Some((_, executors)) = self.by_conversation.remove(&conversation) else {
            return 0;
        };
        for executor in &executors {
            let agent_id = executor.agent_id().to_string();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| executor.stop(reason))) {
                warn!(
                    conversation,
                    agent_id,
                    error = %panic_message(panic.as_ref()),
                    "executor panicked while stopping"
                );
            }
        }
        debug!(conversation, count = executors.len(), reason, "executors stopped");
        executors.len()
    }
}
