//! Inbound message interpretation shared by every connection variant.
//!
//! Frames arriving from a connection's own transport pass through a fixed
//! control vocabulary before anything reaches the broadcast bus: `ping`,
//! `subscribe`, `unsubscribe` and `monitor` are interpreted locally and are
//! never broadcast. Any other command is re-emitted as a broadcast carrying
//! the nested `data` payload.

use serde_json::{Map, Value};
use uuid::Uuid;

use chanrelay_frame::Envelope;

use crate::error::{RelayError, Result};
use crate::fields;
use crate::state::ConnState;

/// The control and error command vocabulary.
pub mod commands {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const MONITOR: &str = "monitor";
    pub const ERROR: &str = "error";
}

/// What a connection should do with an inbound envelope.
#[derive(Debug)]
pub enum Action {
    /// Write this envelope back to the same connection only.
    Reply(Envelope),
    /// Hand this envelope to the hub for fan-out.
    Broadcast(Envelope),
    /// Handled locally (subscription bookkeeping); nothing to emit.
    None,
}

/// Interpret an envelope read from a connection's own transport.
///
/// Control commands mutate `state` or produce a [`Action::Reply`];
/// application commands become [`Action::Broadcast`] with the envelope's
/// `msgId` and `replyTo` carried through so request/reply correlation
/// survives the relay. Schema failures are returned for the caller to turn
/// into an error reply — they must never reach the bus.
pub fn handle_inbound(state: &ConnState, envelope: Envelope) -> Result<Action> {
    match envelope.cmd.as_str() {
        commands::PING => {
            let timestamp = fields::ensure_i64(&envelope.data, "timestamp")?;
            let mut data = Map::new();
            data.insert("timestamp".into(), Value::from(timestamp));
            Ok(Action::Reply(Envelope::new("", commands::PONG, data)))
        }
        commands::SUBSCRIBE => {
            state.subscribe(&envelope.channel);
            Ok(Action::None)
        }
        commands::UNSUBSCRIBE => {
            state.unsubscribe(&envelope.channel);
            Ok(Action::None)
        }
        commands::MONITOR => {
            state.set_monitor(fields::ensure_bool(&envelope.data, "value")?);
            Ok(Action::None)
        }
        _ => {
            let msg_id = envelope.msg_id.ok_or(RelayError::MissingMsgId)?;
            let data = fields::ensure_object(&envelope.data, "data")?;
            Ok(Action::Broadcast(Envelope {
                channel: envelope.channel,
                cmd: envelope.cmd,
                msg_id: Some(msg_id),
                reply_to: envelope.reply_to,
                data,
            }))
        }
    }
}

/// Build the error reply for a failed frame or schema check.
///
/// Echoes the original channel when it was recoverable and correlates via
/// `replyTo` when the faulting message's `msgId` could be read.
pub fn error_reply(channel: Option<&str>, reply_to: Option<Uuid>, message: &str) -> Envelope {
    let mut data = Map::new();
    data.insert("error".into(), Value::String(message.to_string()));
    Envelope::new(channel.unwrap_or(""), commands::ERROR, data).with_reply_to(reply_to)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(channel: &str, cmd: &str, extra: Value) -> Envelope {
        let mut value = extra;
        value["channel"] = json!(channel);
        value["cmd"] = json!(cmd);
        Envelope::parse(value).unwrap()
    }

    #[test]
    fn ping_yields_pong_echoing_timestamp() {
        let state = ConnState::new();
        let action = handle_inbound(&state, envelope("", "ping", json!({"timestamp": 1234}))).unwrap();
        match action {
            Action::Reply(reply) => {
                assert_eq!(reply.cmd, "pong");
                assert_eq!(reply.data["timestamp"], json!(1234));
                assert!(reply.msg_id.is_some());
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn ping_without_timestamp_is_a_schema_error() {
        let state = ConnState::new();
        let err = handle_inbound(&state, envelope("", "ping", json!({}))).unwrap_err();
        assert!(matches!(err, RelayError::MissingField("timestamp")));
    }

    #[test]
    fn subscribe_updates_state_and_stays_local() {
        let state = ConnState::new();
        let action =
            handle_inbound(&state, envelope("chat:channel:1", "subscribe", json!({}))).unwrap();
        assert!(matches!(action, Action::None));
        assert!(state.is_subscribed("chat:channel:1"));
    }

    #[test]
    fn unsubscribe_updates_state() {
        let state = ConnState::new();
        state.subscribe("chat:channel:1");
        let action =
            handle_inbound(&state, envelope("chat:channel:1", "unsubscribe", json!({}))).unwrap();
        assert!(matches!(action, Action::None));
        assert!(!state.is_subscribed("chat:channel:1"));
    }

    #[test]
    fn monitor_sets_flag_from_value() {
        let state = ConnState::new();
        handle_inbound(&state, envelope("", "monitor", json!({"value": true}))).unwrap();
        assert!(state.is_monitor());
        handle_inbound(&state, envelope("", "monitor", json!({"value": false}))).unwrap();
        assert!(!state.is_monitor());
    }

    #[test]
    fn monitor_without_value_is_a_schema_error() {
        let state = ConnState::new();
        let err = handle_inbound(&state, envelope("", "monitor", json!({}))).unwrap_err();
        assert!(matches!(err, RelayError::MissingField("value")));
    }

    #[test]
    fn application_command_becomes_broadcast_with_nested_data() {
        let state = ConnState::new();
        let msg_id = Uuid::new_v4();
        let inbound = envelope(
            "chat:channel:1",
            "send",
            json!({"msgId": msg_id.to_string(), "data": {"msg": "hello"}}),
        );
        let action = handle_inbound(&state, inbound).unwrap();
        match action {
            Action::Broadcast(out) => {
                assert_eq!(out.channel, "chat:channel:1");
                assert_eq!(out.cmd, "send");
                assert_eq!(out.msg_id, Some(msg_id));
                assert_eq!(out.data["msg"], json!("hello"));
            }
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[test]
    fn application_command_without_data_is_an_error() {
        let state = ConnState::new();
        let inbound = envelope(
            "c",
            "send",
            json!({"msgId": Uuid::new_v4().to_string()}),
        );
        let err = handle_inbound(&state, inbound).unwrap_err();
        assert!(matches!(err, RelayError::MissingField("data")));
    }

    #[test]
    fn application_command_without_msg_id_is_an_error() {
        let state = ConnState::new();
        let inbound = envelope("c", "send", json!({"data": {}}));
        let err = handle_inbound(&state, inbound).unwrap_err();
        assert!(matches!(err, RelayError::MissingMsgId));
    }

    #[test]
    fn reply_to_is_carried_through_the_broadcast() {
        let state = ConnState::new();
        let request = Uuid::new_v4();
        let inbound = envelope(
            "c",
            "remove:error",
            json!({
                "msgId": Uuid::new_v4().to_string(),
                "replyTo": request.to_string(),
                "data": {"error": "Unknown server/host"},
            }),
        );
        match handle_inbound(&state, inbound).unwrap() {
            Action::Broadcast(out) => assert_eq!(out.reply_to, Some(request)),
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[test]
    fn error_reply_carries_context() {
        let id = Uuid::new_v4();
        let reply = error_reply(Some("chat:channel:1"), Some(id), "boom");
        assert_eq!(reply.cmd, "error");
        assert_eq!(reply.channel, "chat:channel:1");
        assert_eq!(reply.reply_to, Some(id));
        assert_eq!(reply.data["error"], json!("boom"));
    }
}
