//! Persistence layer: SQLite tracking tables.
//!
//! `tracked_emails` holds one row per message with the genuine-open
//! counter, `open_events` is the append-only audit log of every pixel fetch,
//! and `sender_heartbeats` logs heartbeat pings. Schema lives in the
//! embedded `migrations/` directory.

pub mod models;
pub mod sqlite;

pub use models::{EmailOpenSummary, NewHeartbeat, NewOpenEvent, OpenEvent, TrackedEmail};
pub use sqlite::SqliteStore;
