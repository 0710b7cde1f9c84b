//! Orchestrator modules: the write path, guidance, subscriptions and the
//! live executor registry.

pub mod executors;
mod guidance;
#[allow(clippy::module_inception)]
pub mod orchestrator;
mod subscriptions;

pub use executors::{ExecutorRegistry, LiveExecutor};
pub use orchestrator::{Orchestrator, writable_turn};
