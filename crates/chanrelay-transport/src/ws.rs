use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use chanrelay_core::{error_reply, handle_inbound, Action, ConnState, Hub};
use chanrelay_frame::{decode_payload, Envelope};

use crate::error::{Result, TransportError};

/// Accepts WebSocket connections and wraps each in a relay connection.
///
/// The transport provides message boundaries, so there is no length prefix:
/// every text or binary message is one complete serialized envelope, and
/// the two frame kinds are treated identically.
pub struct WsRelayListener {
    listener: TcpListener,
}

impl WsRelayListener {
    /// Bind to a TCP address for WebSocket upgrades.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        info!(%addr, "websocket listener bound");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and upgrade connections forever, one task per peer.
    pub async fn serve(self, hub: Arc<Hub>) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(TransportError::Accept)?;
            debug!(%peer, "websocket connection accepted");
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                match upgrade_and_run(stream, hub).await {
                    Ok(()) => debug!(%peer, "websocket connection closed"),
                    Err(err) => debug!(%peer, %err, "websocket connection ended"),
                }
            });
        }
    }
}

async fn upgrade_and_run(stream: TcpStream, hub: Arc<Hub>) -> Result<()> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    run_connection(socket, hub).await
}

async fn run_connection(socket: WebSocketStream<TcpStream>, hub: Arc<Hub>) -> Result<()> {
    let state = Arc::new(ConnState::new());
    let (registration, mut inbox) = hub.register(Arc::clone(&state));
    let origin = registration.id();

    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            message = source.next() => match message {
                None => break,
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Text(text))) => {
                    handle_payload(text.as_bytes(), &state, &hub, origin, &mut sink).await?;
                }
                Some(Ok(Message::Binary(payload))) => {
                    handle_payload(&payload, &state, &hub, origin, &mut sink).await?;
                }
            },
            delivery = inbox.recv() => {
                let Some(envelope) = delivery else { break };
                if state.accepts(&envelope.channel) {
                    send_envelope(&mut sink, &envelope).await?;
                }
            }
        }
    }

    Ok(())
}

async fn handle_payload<S>(
    payload: &[u8],
    state: &ConnState,
    hub: &Hub,
    origin: chanrelay_core::ConnectionId,
    sink: &mut S,
) -> Result<()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    match decode_payload(payload) {
        Err(fault) => {
            let reply = error_reply(
                fault.channel.as_deref(),
                fault.msg_id,
                &fault.error.to_string(),
            );
            send_envelope(sink, &reply).await
        }
        Ok(envelope) => {
            let channel = envelope.channel.clone();
            let request = envelope.msg_id;
            match handle_inbound(state, envelope) {
                Ok(Action::Reply(reply)) => send_envelope(sink, &reply).await,
                Ok(Action::Broadcast(out)) => {
                    hub.broadcast(origin, &out);
                    Ok(())
                }
                Ok(Action::None) => Ok(()),
                Err(err) => {
                    let reply = error_reply(Some(&channel), request, &err.to_string());
                    send_envelope(sink, &reply).await
                }
            }
        }
    }
}

/// Serialize and send one envelope as a text message, matching the original
/// protocol's outbound form.
async fn send_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = envelope.to_json_string()?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(TransportError::Ws)
}
