//! The `irc:servers` roster backend: adds and removes bridged servers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use chanrelay_core::{fields, spawn_backend, Backend, BackendCtx, BackendHandle, Hub, RelayError};
use chanrelay_frame::Envelope;

use crate::session::{IrcSession, ServerConfig};

pub const SERVERS_CHANNEL: &str = "irc:servers";

/// Manages one [`IrcSession`] backend per configured host.
#[derive(Default)]
pub struct IrcBridge {
    servers: HashMap<String, BackendHandle>,
}

impl IrcBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bridge on the hub.
    pub fn spawn(hub: Arc<Hub>) -> BackendHandle {
        spawn_backend(hub, Self::new(), &[SERVERS_CHANNEL])
    }

    fn dispatch(&mut self, envelope: Envelope, ctx: &BackendCtx) -> Result<(), RelayError> {
        if envelope.channel != SERVERS_CHANNEL {
            return Ok(());
        }
        let request = envelope.msg_id.ok_or(RelayError::MissingMsgId)?;
        match envelope.cmd.as_str() {
            "add" => self.add_server(&envelope.data, request, ctx)?,
            "remove" => self.remove_server(&envelope.data, request, ctx)?,
            _ => {}
        }
        Ok(())
    }

    fn add_server(
        &mut self,
        data: &Map<String, Value>,
        request: Uuid,
        ctx: &BackendCtx,
    ) -> Result<(), RelayError> {
        let host = fields::ensure_str(data, "host")?.to_string();
        if self.servers.contains_key(&host) {
            ctx.reply_error(SERVERS_CHANNEL, "add:error", "Host already exists", request);
            return Ok(());
        }

        let session = IrcSession::new(ServerConfig::from_data(data)?);
        let subscriptions = session.subscriptions();
        let subscriptions: Vec<&str> = subscriptions.iter().map(String::as_str).collect();
        let handle = spawn_backend(Arc::clone(ctx.hub()), session, &subscriptions);
        self.servers.insert(host.clone(), handle);
        info!(%host, "irc server added");

        let mut added = Map::new();
        added.insert("host".into(), Value::String(host));
        ctx.broadcast(SERVERS_CHANNEL, "added", added);
        ctx.reply(SERVERS_CHANNEL, "add:success", Map::new(), request);
        Ok(())
    }

    fn remove_server(
        &mut self,
        data: &Map<String, Value>,
        request: Uuid,
        ctx: &BackendCtx,
    ) -> Result<(), RelayError> {
        let host = fields::ensure_str(data, "host")?.to_string();
        let Some(handle) = self.servers.remove(&host) else {
            ctx.reply_error(
                SERVERS_CHANNEL,
                "remove:error",
                "Unknown server/host",
                request,
            );
            return Ok(());
        };

        handle.cancel();
        info!(%host, "irc server removed");

        let mut removed = Map::new();
        removed.insert("host".into(), Value::String(host));
        ctx.broadcast(SERVERS_CHANNEL, "removed", removed);
        ctx.reply(SERVERS_CHANNEL, "remove:success", Map::new(), request);
        Ok(())
    }
}

impl Backend for IrcBridge {
    fn name(&self) -> &'static str {
        "irc-bridge"
    }

    fn handle(
        &mut self,
        envelope: Envelope,
        ctx: &BackendCtx,
    ) -> impl Future<Output = Result<(), RelayError>> + Send {
        let result = self.dispatch(envelope, ctx);
        async move { result }
    }
}
