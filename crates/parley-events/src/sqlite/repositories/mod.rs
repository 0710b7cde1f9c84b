//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`,
//! so the same calls work on a pooled connection or inside a transaction.

pub mod attachment;
pub mod conversation;
pub mod event;
pub mod idempotency;
pub mod scenario;
pub mod turn_claim;
