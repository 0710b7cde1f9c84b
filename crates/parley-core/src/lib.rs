//! # parley-core
//!
//! Foundation types shared by every Parley crate.
//!
//! - **Events**: [`EventType`] and [`Finality`], the two enums every log row carries
//! - **Conversations**: [`ConversationMeta`] with participants, scenario binding and
//!   per-conversation limits
//! - **Guidance**: the ephemeral "who acts next" notification
//! - **Scenarios**: reusable participant rosters referenced from metadata
//! - **Outcomes**: structured payload written by conversation-closing messages
//! - **Logging**: `tracing` subscriber setup shared by binaries and tests

#![deny(unsafe_code)]

pub mod constants;
pub mod conversation;
pub mod event;
pub mod guidance;
pub mod logging;
pub mod outcome;
pub mod scenario;
pub mod time;

pub use conversation::{
    ConversationConfig, ConversationMeta, ConversationStatus, Participant, ParticipantKind,
    PolicyKind,
};
pub use event::{EventType, Finality, ParseEnumError};
pub use guidance::{Guidance, GuidanceKind};
pub use logging::LogFormat;
pub use outcome::{Outcome, OutcomeStatus};
pub use scenario::{Scenario, ScenarioAgent};
