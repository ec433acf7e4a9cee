use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use chanrelay_core::{error_reply, handle_inbound, Action, ConnState, Hub};
use chanrelay_frame::{Decoded, EnvelopeCodec};

use crate::error::{Result, TransportError};

/// Accepts raw TCP connections and wraps each in a relay connection.
pub struct TcpRelayListener {
    listener: TcpListener,
}

impl TcpRelayListener {
    /// Bind to a TCP address. A bind failure is fatal at startup.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        info!(%addr, "tcp listener bound");
        Ok(Self { listener })
    }

    /// The locally bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per peer.
    pub async fn serve(self, hub: Arc<Hub>) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(TransportError::Accept)?;
            debug!(%peer, "tcp connection accepted");
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                match run_connection(stream, hub).await {
                    Ok(()) => debug!(%peer, "tcp connection closed"),
                    Err(err) => debug!(%peer, %err, "tcp connection ended"),
                }
            });
        }
    }
}

/// Drive one TCP connection: decode inbound frames, interpret the control
/// vocabulary, relay application commands to the hub, and write filtered
/// deliveries back out. Registration drops (and thus unregisters) on every
/// exit path, before any further delivery logic can run.
async fn run_connection(stream: TcpStream, hub: Arc<Hub>) -> Result<()> {
    let state = Arc::new(ConnState::new());
    let (registration, mut inbox) = hub.register(Arc::clone(&state));
    let origin = registration.id();

    let (read, write) = stream.into_split();
    let mut frames = FramedRead::new(read, EnvelopeCodec::default());
    let mut sink = FramedWrite::new(write, EnvelopeCodec::default());

    loop {
        tokio::select! {
            decoded = frames.next() => match decoded {
                None => break,
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Decoded::Fault(fault))) => {
                    // Fatal to the single frame only; the reply goes to the
                    // faulting connection and nowhere else.
                    let reply = error_reply(
                        fault.channel.as_deref(),
                        fault.msg_id,
                        &fault.error.to_string(),
                    );
                    sink.send(reply).await?;
                }
                Some(Ok(Decoded::Envelope(envelope))) => {
                    let channel = envelope.channel.clone();
                    let request = envelope.msg_id;
                    match handle_inbound(&state, envelope) {
                        Ok(Action::Reply(reply)) => sink.send(reply).await?,
                        Ok(Action::Broadcast(out)) => hub.broadcast(origin, &out),
                        Ok(Action::None) => {}
                        Err(err) => {
                            let reply = error_reply(Some(&channel), request, &err.to_string());
                            sink.send(reply).await?;
                        }
                    }
                }
            },
            delivery = inbox.recv() => {
                let Some(envelope) = delivery else { break };
                if state.accepts(&envelope.channel) {
                    sink.send(envelope).await?;
                }
            }
        }
    }

    Ok(())
}
