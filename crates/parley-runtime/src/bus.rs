//! In-process subscription bus.
//!
//! Delivery is synchronous on the publishing thread, in registration order.
//! Listeners are snapshotted under the lock and invoked outside it, so a
//! listener may subscribe or unsubscribe without deadlocking. A panicking
//! listener is logged and skipped; the others still receive the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use parley_core::constants::ALL_CONVERSATIONS;
use parley_core::{EventType, Guidance};
use parley_events::EventRow;

/// Subscription handle returned by [`SubscriptionBus::subscribe`].
pub type SubscriptionId = u64;

/// Something delivered to a listener.
#[derive(Clone, Debug, PartialEq)]
pub enum BusEvent {
    /// A committed log row, exactly as persisted.
    Event(EventRow),
    /// Ephemeral "who acts next" notification.
    Guidance(Guidance),
}

impl BusEvent {
    /// Conversation the item belongs to.
    pub fn conversation(&self) -> i64 {
        match self {
            Self::Event(row) => row.conversation,
            Self::Guidance(g) => g.conversation,
        }
    }
}

/// Callback invoked for each delivered item.
pub type Listener = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Which streams a subscription receives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Log rows only.
    #[default]
    Events,
    /// Log rows and guidance.
    EventsAndGuidance,
    /// Guidance only.
    GuidanceOnly,
}

impl Delivery {
    fn events(self) -> bool {
        !matches!(self, Self::GuidanceOnly)
    }

    fn guidance(self) -> bool {
        !matches!(self, Self::Events)
    }
}

/// Row filter. Guidance is matched on conversation only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Conversation id, or [`ALL_CONVERSATIONS`].
    pub conversation: i64,
    /// Allowed event types; all when `None`.
    pub types: Option<Vec<EventType>>,
    /// Allowed authors; all when `None`.
    pub agents: Option<Vec<String>>,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl SubscriptionFilter {
    /// Everything from one conversation.
    pub fn conversation(conversation: i64) -> Self {
        Self {
            conversation,
            types: None,
            agents: None,
        }
    }

    /// Everything from every conversation.
    pub fn all() -> Self {
        Self::conversation(ALL_CONVERSATIONS)
    }

    /// Restrict to the given event types.
    #[must_use]
    pub fn with_types(mut self, types: Vec<EventType>) -> Self {
        self.types = Some(types);
        self
    }

    /// Restrict to the given authors.
    #[must_use]
    pub fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agents = Some(agents);
        self
    }

    fn matches_conversation(&self, conversation: i64) -> bool {
        self.conversation == ALL_CONVERSATIONS || self.conversation == conversation
    }

    fn matches_row(&self, row: &EventRow) -> bool {
        if !self.matches_conversation(row.conversation) {
            return false;
        }
        if let Some(types) = &self.types {
            if !types.contains(&row.event_type) {
                return false;
            }
        }
        if let Some(agents) = &self.agents {
            if !agents.iter().any(|a| *a == row.agent_id) {
                return false;
            }
        }
        true
    }

    fn matches(&self, item: &BusEvent) -> bool {
        match item {
            BusEvent::Event(row) => self.matches_row(row),
            BusEvent::Guidance(g) => self.matches_conversation(g.conversation),
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    delivery: Delivery,
    listener: Listener,
}

/// Conversation-scoped pub/sub for one process.
pub struct SubscriptionBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionBus {
    /// Create an empty, open bus.
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a listener.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        delivery: Delivery,
        listener: Listener,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().push(Subscription {
            id,
            filter,
            delivery,
            listener,
        });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fan a committed row out to every matching event listener.
    /// Returns how many listeners were invoked.
    pub fn publish(&self, row: &EventRow) -> usize {
        self.fan_out(&BusEvent::Event(row.clone()), Delivery::events)
    }

    /// Fan guidance out to every listener that opted in.
    pub fn publish_guidance(&self, guidance: &Guidance) -> usize {
        self.fan_out(&BusEvent::Guidance(guidance.clone()), Delivery::guidance)
    }

    /// Deliver one item to a single subscription, ignoring its filter.
    pub fn deliver(&self, id: SubscriptionId, item: &BusEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        let listener = self
            .subscriptions
            .lock()
            .iter()
            .find(|s| s.id == id)
            .map(|s| Arc::clone(&s.listener));
        match listener {
            Some(listener) => {
                invoke(id, &listener, item);
                true
            }
            None => false,
        }
    }

    /// Stop all fan-out. Existing registrations stay but receive nothing.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn fan_out(&self, item: &BusEvent, wants: fn(Delivery) -> bool) -> usize {
        if self.is_closed() {
            return 0;
        }
        let targets: Vec<(SubscriptionId, Listener)> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| wants(s.delivery) && s.filter.matches(item))
            .map(|s| (s.id, Arc::clone(&s.listener)))
            .collect();

        for (id, listener) in &targets {
            invoke(*id, listener, item);
        }
        targets.len()
    }
}

fn invoke(id: SubscriptionId, listener: &Listener, item: &BusEvent) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(item))) {
        warn!(
            subscription = id,
            conversation = item.conversation(),
            error = %panic_message(panic.as_ref()),
            "listener panicked"
        );
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
