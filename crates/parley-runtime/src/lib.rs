//! # parley-runtime
//!
//! Coordination layer on top of the event log.
//!
//! - **Policies**: pure `decide(snapshot, last_event)` functions picking the next
//!   speaker (strict alternation, scenario-driven, competitive)
//! - **Bus**: synchronous in-process fan-out of committed rows and guidance
//! - **Orchestrator**: validated writes, post-write turn ceiling and guidance,
//!   snapshots, subscriptions, `wait_for_turn` / `wait_for_updates`
//! - **Watchdog**: periodic reclamation of stalled conversations

#![deny(unsafe_code)]

pub mod bus;
pub mod errors;
pub mod orchestrator;
pub mod policy;
pub mod types;
pub mod watchdog;

pub use bus::{BusEvent, Delivery, Listener, SubscriptionBus, SubscriptionFilter, SubscriptionId};
pub use errors::{Result, RuntimeError};
pub use orchestrator::{ExecutorRegistry, LiveExecutor, Orchestrator};
pub use policy::{Decision, PolicySet, SchedulingPolicy};
pub use types::{ConversationSnapshot, EndOptions, WaitOutcome};
pub use watchdog::{SweepReport, Watchdog, WatchdogStats};
