//! `SQLite` backend for the event log.
//!
//! - **[`connection`]**: `r2d2` pool with WAL, foreign keys and performance
//!   pragmas applied to every connection.
//! - **[`migrations`]**: version-tracked schema, embedded at compile time.
//! - **[`row_types`]**: decoded row structs.
//! - **[`repositories`]**: stateless repositories over `&Connection`.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, new_file, new_in_memory,
    verify_pragmas,
};
pub use migrations::{current_version, latest_version, run_migrations};
