//! Transactional store façade over the repositories.

pub mod event_store;

pub use event_store::{AppendEvent, Appended, EventStore};
