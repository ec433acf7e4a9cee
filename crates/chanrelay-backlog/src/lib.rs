//! SQL-backed chat backlog for the channel relay.
//!
//! [`Backlog`] is a hub backend that listens to channel discovery on
//! `chat:channels` and persists every `message` it sees into SQLite via
//! `sqlx`. It never serves reads in this build; `more` style history
//! queries are left to a future schema version.

pub mod backlog;
pub mod schema;

pub use backlog::{Backlog, CHANNELS_CHANNEL};
pub use schema::LATEST_SCHEMA_VERSION;
