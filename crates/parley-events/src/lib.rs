//! # parley-events
//!
//! Append-only conversation log on `SQLite`.
//!
//! - **[`EventStore`]**: transactional façade; [`EventStore::append`] enforces
//!   turn and finality invariants, idempotency and attachment extraction in a
//!   single IMMEDIATE transaction
//! - **Repositories**: conversations, events, attachments, idempotency keys,
//!   turn claims and scenarios, each a stateless struct over `&Connection`
//! - **Migrations**: embedded SQL, versioned in `schema_version`
//!
//! Sequence numbers are per conversation and contiguous from 1. Turn state
//! (open, closed, head) is always derived from the rows, never cached.

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{EventStoreError, Result};
pub use sqlite::repositories::attachment::hex_sha256;
pub use sqlite::row_types::{
    AppendResult, AttachmentRow, ConversationRow, EventRow, Head, TurnClaimRow,
};
pub use store::{AppendEvent, Appended, EventStore};
