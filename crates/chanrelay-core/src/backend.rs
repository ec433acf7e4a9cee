//! Bridge/persistence connections.
//!
//! A backend is a non-network participant — an IRC bridge, a backlog
//! writer — that joins the hub exactly like a socket does: it registers,
//! receives deliveries filtered by its own subscriptions, and emits
//! broadcasts. The hub never learns the difference.

use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use chanrelay_frame::Envelope;

use crate::error::RelayError;
use crate::hub::{ConnectionId, Hub};
use crate::state::ConnState;

/// Capabilities handed to a backend: its identity on the bus plus the
/// outbound half of the connection contract.
#[derive(Clone)]
pub struct BackendCtx {
    hub: Arc<Hub>,
    id: ConnectionId,
    state: Arc<ConnState>,
}

impl BackendCtx {
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Emit a broadcast with a freshly stamped `msgId`.
    pub fn broadcast(&self, channel: &str, cmd: &str, data: Map<String, Value>) {
        self.hub.broadcast(self.id, &Envelope::new(channel, cmd, data));
    }

    /// Emit a reply broadcast correlated to a request's `msgId`.
    ///
    /// Routing errors ("unknown host", "not connected") travel this way:
    /// ordinary envelopes with an `error` payload field, reaching only the
    /// requester through normal fan-out plus self-filtering.
    pub fn reply(&self, channel: &str, cmd: &str, data: Map<String, Value>, reply_to: Uuid) {
        self.hub
            .broadcast(self.id, &Envelope::reply(channel, cmd, data, reply_to));
    }

    /// Convenience for a reply whose payload is a single `error` message.
    pub fn reply_error(&self, channel: &str, cmd: &str, message: &str, reply_to: Uuid) {
        let mut data = Map::new();
        data.insert("error".into(), Value::String(message.to_string()));
        self.reply(channel, cmd, data, reply_to);
    }

    /// Subscribe from application logic — symmetric with wire-level
    /// subscribe and backed by the same state used for filtering.
    pub fn subscribe(&self, channel: &str) {
        self.state.subscribe(channel);
    }

    pub fn unsubscribe(&self, channel: &str) {
        self.state.unsubscribe(channel);
    }
}

/// The contract every bridge/persistence connection implements.
pub trait Backend: Send + 'static {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Called once after registration, before any delivery. An error here
    /// is fatal for the backend (resource errors at startup).
    fn started(
        &mut self,
        ctx: &BackendCtx,
    ) -> impl Future<Output = Result<(), RelayError>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// Handle one delivery that passed the subscription filter.
    fn handle(
        &mut self,
        envelope: Envelope,
        ctx: &BackendCtx,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;
}

/// Handle to a running backend task.
pub struct BackendHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl BackendHandle {
    /// Ask the backend to stop and wait for its task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }

    /// Ask the backend to stop without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Register `backend` with the hub and drive its inbox until shutdown.
pub fn spawn_backend<B: Backend>(
    hub: Arc<Hub>,
    backend: B,
    subscriptions: &[&str],
) -> BackendHandle {
    let cancel = CancellationToken::new();
    let join = tokio::spawn(run_backend(
        hub,
        backend,
        subscriptions.iter().map(|s| s.to_string()).collect(),
        cancel.clone(),
    ));
    BackendHandle { cancel, join }
}

async fn run_backend<B: Backend>(
    hub: Arc<Hub>,
    mut backend: B,
    subscriptions: Vec<String>,
    cancel: CancellationToken,
) {
    let state = Arc::new(ConnState::new());
    for channel in &subscriptions {
        state.subscribe(channel);
    }
    let (registration, mut inbox) = hub.register(Arc::clone(&state));
    let ctx = BackendCtx {
        hub: Arc::clone(&hub),
        id: registration.id(),
        state,
    };

    if let Err(err) = backend.started(&ctx).await {
        warn!(backend = backend.name(), %err, "backend startup failed");
        return;
    }
    debug!(backend = backend.name(), id = %ctx.id, "backend started");

    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = inbox.recv() => match delivery {
                Some(envelope) => envelope,
                None => break,
            },
        };
        if !ctx.state.accepts(&envelope.channel) {
            continue;
        }
        if let Err(err) = backend.handle(envelope, &ctx).await {
            // Schema problems in a delivery are local to that message.
            warn!(backend = backend.name(), %err, "backend delivery failed");
        }
    }

    debug!(backend = backend.name(), id = %ctx.id, "backend stopped");
    drop(registration);
}
