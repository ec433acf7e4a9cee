use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use chanrelay_core::commands;
use chanrelay_frame::{Decoded, Envelope, EnvelopeCodec};

use crate::error::{Result, TransportError};

/// A framed TCP client for the relay, used by the CLI and tests.
pub struct Client {
    frames: FramedRead<OwnedReadHalf, EnvelopeCodec>,
    sink: FramedWrite<OwnedWriteHalf, EnvelopeCodec>,
}

impl Client {
    /// Connect to a relay's TCP listener.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        let (read, write) = stream.into_split();
        Ok(Self {
            frames: FramedRead::new(read, EnvelopeCodec::default()),
            sink: FramedWrite::new(write, EnvelopeCodec::default()),
        })
    }

    /// Send a pre-built envelope.
    pub async fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.sink.send(envelope).await.map_err(Into::into)
    }

    /// Subscribe this connection to a channel.
    pub async fn subscribe(&mut self, channel: &str) -> Result<()> {
        self.send(Envelope::new(channel, commands::SUBSCRIBE, Map::new()))
            .await
    }

    /// Unsubscribe this connection from a channel.
    pub async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.send(Envelope::new(channel, commands::UNSUBSCRIBE, Map::new()))
            .await
    }

    /// Set this connection's monitor flag.
    pub async fn monitor(&mut self, value: bool) -> Result<()> {
        let mut data = Map::new();
        data.insert("value".into(), Value::Bool(value));
        self.send(Envelope::new("", commands::MONITOR, data)).await
    }

    /// Publish an application command; returns the stamped `msgId` for
    /// reply correlation.
    pub async fn publish(
        &mut self,
        channel: &str,
        cmd: &str,
        data: Map<String, Value>,
    ) -> Result<Uuid> {
        let mut payload = Map::new();
        payload.insert("data".into(), Value::Object(data));
        let msg_id = Uuid::new_v4();
        let mut envelope = Envelope::new(channel, cmd, payload);
        envelope.msg_id = Some(msg_id);
        self.send(envelope).await?;
        Ok(msg_id)
    }

    /// Read the next envelope from the relay.
    ///
    /// The relay only ever sends well-formed envelopes, so a decode fault
    /// here means the stream is corrupt.
    pub async fn next(&mut self) -> Result<Envelope> {
        match self.frames.next().await {
            None => Err(TransportError::Closed),
            Some(Err(err)) => Err(err.into()),
            Some(Ok(Decoded::Envelope(envelope))) => Ok(envelope),
            Some(Ok(Decoded::Fault(fault))) => Err(fault.error.into()),
        }
    }
}
