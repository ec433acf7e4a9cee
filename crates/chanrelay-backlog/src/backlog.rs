//! The backlog backend: mirrors channel discovery into SQL and logs every
//! chat message it observes.

use std::collections::HashMap;
use std::future::Future;

use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info};

use chanrelay_core::{fields, Backend, BackendCtx, RelayError};
use chanrelay_frame::Envelope;

use crate::schema::{self, db_err};

pub const CHANNELS_CHANNEL: &str = "chat:channels";

/// SQL-backed persistence connection.
///
/// Subscribed to `chat:channels`; every channel it learns about gets a row
/// in `chat_channels` and a live subscription to its `chat:channel:<id>`
/// traffic, which is written to `chat_messages` one row per `message`.
pub struct Backlog {
    pool: SqlitePool,
    /// `chat:channels` id → `chat_channels.id`.
    channel_rows: HashMap<String, i64>,
}

impl Backlog {
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            channel_rows: HashMap::new(),
        }
    }

    /// Open the database. Failure here is fatal at startup.
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(db_err)?;
        info!(%url, "backlog database opened");
        Ok(Self::with_pool(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Make sure `id` has a `chat_channels` row and a live subscription;
    /// idempotent for repeated announcements.
    async fn ensure_channel(&mut self, id: &str, ctx: &BackendCtx) -> Result<i64, RelayError> {
        if let Some(row) = self.channel_rows.get(id) {
            return Ok(*row);
        }

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM chat_channels WHERE uuid = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let row = match existing {
            Some(row) => row,
            None => sqlx::query("INSERT INTO chat_channels (uuid) VALUES (?)")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?
                .last_insert_rowid(),
        };

        self.channel_rows.insert(id.to_string(), row);
        ctx.subscribe(&format!("chat:channel:{id}"));
        debug!(channel = id, row, "tracking channel");
        Ok(row)
    }

    fn forget_channel(&mut self, id: &str, ctx: &BackendCtx) {
        // Rows are kept; only the live subscription ends.
        self.channel_rows.remove(id);
        ctx.unsubscribe(&format!("chat:channel:{id}"));
    }

    async fn record_message(
        &mut self,
        id: &str,
        data: &Map<String, Value>,
        ctx: &BackendCtx,
    ) -> Result<(), RelayError> {
        let row = self.ensure_channel(id, ctx).await?;
        sqlx::query(
            "INSERT INTO chat_messages (channel, source, type, content, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(row)
        .bind(fields::ensure_str(data, "from")?)
        .bind(fields::ensure_str(data, "type")?)
        .bind(fields::ensure_str(data, "content")?)
        .bind(fields::ensure_i64(data, "timestamp")?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn dispatch(&mut self, envelope: Envelope, ctx: &BackendCtx) -> Result<(), RelayError> {
        if envelope.channel == CHANNELS_CHANNEL {
            match envelope.cmd.as_str() {
                "all" => {
                    for item in fields::ensure_objects(&envelope.data, "channels")? {
                        let id = fields::ensure_str(&item, "id")?.to_string();
                        self.ensure_channel(&id, ctx).await?;
                    }
                }
                "added" => {
                    let id = fields::ensure_str(&envelope.data, "id")?.to_string();
                    self.ensure_channel(&id, ctx).await?;
                }
                "removed" => {
                    let id = fields::ensure_str(&envelope.data, "id")?.to_string();
                    self.forget_channel(&id, ctx);
                }
                _ => {}
            }
            return Ok(());
        }

        if let Some(id) = envelope.channel.strip_prefix("chat:channel:") {
            if envelope.cmd == "message" {
                let id = id.to_string();
                self.record_message(&id, &envelope.data, ctx).await?;
            }
        }
        Ok(())
    }
}

impl Backend for Backlog {
    fn name(&self) -> &'static str {
        "backlog"
    }

    fn started(
        &mut self,
        ctx: &BackendCtx,
    ) -> impl Future<Output = Result<(), RelayError>> + Send {
        let ctx = ctx.clone();
        async move {
            schema::create_tables(&self.pool).await?;
            schema::migrate(&self.pool).await?;

            // Resume subscriptions for channels seen in earlier runs.
            let known: Vec<(String, i64)> =
                sqlx::query_as::<_, (String, i64)>("SELECT uuid, id FROM chat_channels")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_err)?;
            for (uuid, row) in known {
                ctx.subscribe(&format!("chat:channel:{uuid}"));
                self.channel_rows.insert(uuid, row);
            }

            // Ask whoever owns channel discovery for the current list.
            ctx.broadcast(CHANNELS_CHANNEL, "list", Map::new());
            Ok(())
        }
    }

    fn handle(
        &mut self,
        envelope: Envelope,
        ctx: &BackendCtx,
    ) -> impl Future<Output = Result<(), RelayError>> + Send {
        let ctx = ctx.clone();
        async move { self.dispatch(envelope, &ctx).await }
    }
}
