//! Package-level constants.

/// Current version of Parley (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "parley";

/// Agent id used for events the engine writes on its own behalf.
pub const SYSTEM_AGENT_ID: &str = "system";

/// Turn number of the out-of-band system lane.
pub const SYSTEM_TURN: i64 = 0;

/// Conversation id that subscribes to every conversation.
pub const ALL_CONVERSATIONS: i64 = -1;

/// Payload key carrying the caller's idempotency token.
pub const CLIENT_REQUEST_ID_KEY: &str = "clientRequestId";

/// Payload key carrying inline or referenced attachments.
pub const ATTACHMENTS_KEY: &str = "attachments";

/// Payload key carrying a closing message's outcome.
pub const OUTCOME_KEY: &str = "outcome";

/// System event kind written when a conversation is created.
pub const META_CREATED_KIND: &str = "meta_created";

/// System event kind written when the watchdog reclaims a conversation.
pub const IDLE_TIMEOUT_KIND: &str = "idle_timeout";
