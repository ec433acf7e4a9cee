//! Schema creation and versioned migration for the backlog database.

use sqlx::SqlitePool;

use chanrelay_core::RelayError;

pub const LATEST_SCHEMA_VERSION: i64 = 1;

pub(crate) fn db_err(err: sqlx::Error) -> RelayError {
    RelayError::Backend(err.to_string())
}

/// Create the tables on first run and stamp the schema version.
pub async fn create_tables(pool: &SqlitePool) -> Result<(), RelayError> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'settings'",
    )
    .fetch_optional(pool)
    .await
    .map_err(db_err)?;
    if existing.is_some() {
        return Ok(());
    }

    tracing::debug!("creating backlog database");
    sqlx::query(
        "CREATE TABLE settings (
            category VARCHAR(64) NOT NULL,
            key VARCHAR(64) NOT NULL,
            value INTEGER
        )",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    sqlx::query(
        "CREATE TABLE chat_channels (
            id INTEGER PRIMARY KEY NOT NULL,
            name VARCHAR(128),
            uuid TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    sqlx::query(
        "CREATE TABLE chat_messages (
            id INTEGER PRIMARY KEY NOT NULL,
            channel INTEGER NOT NULL REFERENCES chat_channels (id),
            source VARCHAR(128) NOT NULL,
            type VARCHAR(32) NOT NULL,
            content VARCHAR(512) NOT NULL,
            timestamp INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    sqlx::query("INSERT INTO settings (category, key, value) VALUES ('backlog', 'schema_version', ?)")
        .bind(LATEST_SCHEMA_VERSION)
        .execute(pool)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Walk the schema version up to [`LATEST_SCHEMA_VERSION`].
pub async fn migrate(pool: &SqlitePool) -> Result<(), RelayError> {
    let current: i64 = sqlx::query_scalar(
        "SELECT value FROM settings WHERE category = 'backlog' AND key = 'schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    if current > LATEST_SCHEMA_VERSION {
        return Err(RelayError::Backend(format!(
            "backlog schema version {current} is newer than this build supports ({LATEST_SCHEMA_VERSION})"
        )));
    }
    // No migrations yet; version 1 is the first schema.
    Ok(())
}
