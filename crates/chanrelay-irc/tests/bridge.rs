//! Roster semantics of the `irc:servers` bridge, driven through a real hub.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use chanrelay_core::{ConnState, Hub, Inbox, Registration};
use chanrelay_frame::Envelope;
use chanrelay_irc::{IrcBridge, SERVERS_CHANNEL};

struct Probe {
    registration: Registration,
    inbox: Inbox,
    state: Arc<ConnState>,
}

fn monitor_probe(hub: &Arc<Hub>) -> Probe {
    let state = Arc::new(ConnState::new());
    state.set_monitor(true);
    let (registration, inbox) = hub.register(Arc::clone(&state));
    Probe {
        registration,
        inbox,
        state,
    }
}

impl Probe {
    async fn next(&mut self) -> Envelope {
        loop {
            let envelope = tokio::time::timeout(Duration::from_secs(2), self.inbox.recv())
                .await
                .expect("delivery should arrive in time")
                .expect("inbox should stay open");
            if self.state.accepts(&envelope.channel) {
                return envelope;
            }
        }
    }

    fn request(&self, hub: &Hub, channel: &str, cmd: &str, data: Map<String, Value>) -> Uuid {
        let envelope = Envelope::new(channel, cmd, data);
        let msg_id = envelope.msg_id.expect("new envelopes are stamped");
        hub.broadcast(self.registration.id(), &envelope);
        msg_id
    }
}

fn add_payload(host: &str) -> Map<String, Value> {
    match json!({
        "host": host,
        "nickNames": ["relay"],
        "userName": "relay",
        "realName": "Relay Bridge",
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn host_payload(host: &str) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("host".into(), json!(host));
    data
}

#[tokio::test]
async fn add_announces_and_confirms() {
    let hub = Arc::new(Hub::new());
    let mut probe = monitor_probe(&hub);
    let _bridge = IrcBridge::spawn(Arc::clone(&hub));

    let request = probe.request(&hub, SERVERS_CHANNEL, "add", add_payload("irc.example.org"));

    let added = probe.next().await;
    assert_eq!(added.channel, SERVERS_CHANNEL);
    assert_eq!(added.cmd, "added");
    assert_eq!(added.data["host"], json!("irc.example.org"));
    assert_eq!(added.reply_to, None);

    let success = probe.next().await;
    assert_eq!(success.cmd, "add:success");
    assert_eq!(success.reply_to, Some(request));

    // The session announces its server console buffer to discovery.
    let console = probe.next().await;
    assert_eq!(console.channel, "chat:channels");
    assert_eq!(console.cmd, "added");
    assert_eq!(console.data["id"], json!("irc.example.org"));
    assert_eq!(console.data["parent"], json!(null));
}

#[tokio::test]
async fn duplicate_add_is_rejected() {
    let hub = Arc::new(Hub::new());
    let mut probe = monitor_probe(&hub);
    let _bridge = IrcBridge::spawn(Arc::clone(&hub));

    probe.request(&hub, SERVERS_CHANNEL, "add", add_payload("irc.example.org"));
    // added + add:success + console announcement
    for _ in 0..3 {
        probe.next().await;
    }

    let request = probe.request(&hub, SERVERS_CHANNEL, "add", add_payload("irc.example.org"));
    let reply = probe.next().await;
    assert_eq!(reply.cmd, "add:error");
    assert_eq!(reply.data["error"], json!("Host already exists"));
    assert_eq!(reply.reply_to, Some(request));
}

#[tokio::test]
async fn remove_of_unknown_host_is_an_error_reply() {
    let hub = Arc::new(Hub::new());
    let mut probe = monitor_probe(&hub);
    let _bridge = IrcBridge::spawn(Arc::clone(&hub));

    let request = probe.request(
        &hub,
        SERVERS_CHANNEL,
        "remove",
        host_payload("unknown-host"),
    );

    let reply = probe.next().await;
    assert_eq!(reply.channel, SERVERS_CHANNEL);
    assert_eq!(reply.cmd, "remove:error");
    assert_eq!(reply.data["error"], json!("Unknown server/host"));
    assert_eq!(reply.reply_to, Some(request));
}

#[tokio::test]
async fn remove_tears_the_session_down() {
    let hub = Arc::new(Hub::new());
    let mut probe = monitor_probe(&hub);
    let _bridge = IrcBridge::spawn(Arc::clone(&hub));

    probe.request(&hub, SERVERS_CHANNEL, "add", add_payload("irc.example.org"));
    for _ in 0..3 {
        probe.next().await;
    }
    // probe + bridge + session
    assert_eq!(hub.len(), 3);

    let request = probe.request(
        &hub,
        SERVERS_CHANNEL,
        "remove",
        host_payload("irc.example.org"),
    );

    let removed = probe.next().await;
    assert_eq!(removed.cmd, "removed");
    assert_eq!(removed.data["host"], json!("irc.example.org"));

    let success = probe.next().await;
    assert_eq!(success.cmd, "remove:success");
    assert_eq!(success.reply_to, Some(request));

    // The session task winds down and leaves the roster.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while hub.len() != 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "removed session should leave the roster"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn add_with_malformed_payload_is_ignored_without_crashing() {
    let hub = Arc::new(Hub::new());
    let mut probe = monitor_probe(&hub);
    let _bridge = IrcBridge::spawn(Arc::clone(&hub));

    // Missing nickNames: schema failure, logged and dropped by the runner.
    probe.request(&hub, SERVERS_CHANNEL, "add", host_payload("irc.example.org"));

    // The bridge is still alive and serves the next request.
    let request = probe.request(&hub, SERVERS_CHANNEL, "remove", host_payload("nope"));
    let reply = probe.next().await;
    assert_eq!(reply.cmd, "remove:error");
    assert_eq!(reply.reply_to, Some(request));
}
