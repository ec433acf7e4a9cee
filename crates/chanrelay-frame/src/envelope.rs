use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{FrameError, Result};

/// Reserved top-level keys that belong to the envelope, not the payload.
const KEY_CHANNEL: &str = "channel";
const KEY_CMD: &str = "cmd";
const KEY_MSG_ID: &str = "msgId";
const KEY_REPLY_TO: &str = "replyTo";

/// The structured message unit exchanged over the wire and through the hub.
///
/// On the wire an envelope is a flat JSON object: the `data` entries at top
/// level plus the reserved keys `channel`, `cmd`, `msgId` and `replyTo`.
/// Decoding collects every non-reserved key into `data`, so
/// `Envelope::parse(e.to_value()) == e` for any well-formed envelope.
///
/// Envelopes are immutable once constructed; a reply is always built as a
/// new envelope with `reply_to` referencing the request's `msg_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Topic string scoping subscription and delivery. Hierarchical by
    /// convention (`chat:channel:<id>`) but opaque to the router.
    pub channel: String,
    /// Application- or control-level verb.
    pub cmd: String,
    /// Unique id stamped by the sender. Always present on locally
    /// originated envelopes; may be absent on inbound control frames.
    pub msg_id: Option<Uuid>,
    /// Set when this message is a direct reply to a previous `msg_id`.
    pub reply_to: Option<Uuid>,
    /// The open payload mapping.
    pub data: Map<String, Value>,
}

impl Envelope {
    /// Build a new envelope with a freshly stamped `msgId`.
    pub fn new(channel: impl Into<String>, cmd: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            channel: channel.into(),
            cmd: cmd.into(),
            msg_id: Some(Uuid::new_v4()),
            reply_to: None,
            data,
        }
    }

    /// Build a reply envelope correlated to `reply_to`.
    pub fn reply(
        channel: impl Into<String>,
        cmd: impl Into<String>,
        data: Map<String, Value>,
        reply_to: Uuid,
    ) -> Self {
        Self {
            reply_to: Some(reply_to),
            ..Self::new(channel, cmd, data)
        }
    }

    /// Set or clear the correlation id.
    pub fn with_reply_to(mut self, reply_to: Option<Uuid>) -> Self {
        self.reply_to = reply_to;
        self
    }

    /// Parse an envelope from a decoded JSON value.
    ///
    /// `channel` and `cmd` must be present as strings; `msgId` and `replyTo`
    /// are optional but must parse as UUIDs when present. All other keys
    /// become the `data` payload.
    pub fn parse(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(FrameError::NotAnObject);
        };

        let channel = take_string(&mut obj, KEY_CHANNEL)?;
        let cmd = take_string(&mut obj, KEY_CMD)?;
        let msg_id = take_id(&mut obj, KEY_MSG_ID)?;
        let reply_to = take_id(&mut obj, KEY_REPLY_TO)?;

        Ok(Self {
            channel,
            cmd,
            msg_id,
            reply_to,
            data: obj,
        })
    }

    /// Serialize to the flat wire object.
    ///
    /// Reserved keys win over payload entries with the same name.
    pub fn to_value(&self) -> Value {
        let mut obj = self.data.clone();
        obj.insert(KEY_CHANNEL.into(), Value::String(self.channel.clone()));
        obj.insert(KEY_CMD.into(), Value::String(self.cmd.clone()));
        if let Some(id) = self.msg_id {
            obj.insert(KEY_MSG_ID.into(), Value::String(id.to_string()));
        }
        if let Some(id) = self.reply_to {
            obj.insert(KEY_REPLY_TO.into(), Value::String(id.to_string()));
        }
        Value::Object(obj)
    }

    /// Serialize to JSON bytes (the frame payload).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_value()).map_err(FrameError::InvalidJson)
    }

    /// Serialize to a JSON string (the WebSocket text form).
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(&self.to_value()).map_err(FrameError::InvalidJson)
    }

    /// Decode a whole serialized payload into an envelope.
    ///
    /// This is the message-bounded path (WebSocket frames); the TCP path
    /// goes through [`crate::codec::EnvelopeCodec`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::parse(value)
    }
}

fn take_string(obj: &mut Map<String, Value>, key: &'static str) -> Result<String> {
    match obj.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(FrameError::MissingField(key)),
    }
}

fn take_id(obj: &mut Map<String, Value>, key: &'static str) -> Result<Option<Uuid>> {
    match obj.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| FrameError::InvalidId { field: key, value: s }),
        Some(other) => Err(FrameError::InvalidId {
            field: key,
            value: other.to_string(),
        }),
    }
}
