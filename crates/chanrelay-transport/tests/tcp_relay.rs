//! End-to-end relay behavior over real TCP loopback connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use chanrelay_core::Hub;
use chanrelay_frame::Envelope;
use chanrelay_transport::{Client, TcpRelayListener};

async fn start_relay() -> (Arc<Hub>, SocketAddr) {
    let hub = Arc::new(Hub::new());
    let listener = TcpRelayListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let serve_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        let _ = listener.serve(serve_hub).await;
    });
    (hub, addr)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Round-trip a ping so every previously sent frame on this connection has
/// been processed (per-connection handling is FIFO).
async fn barrier(client: &mut Client) {
    let mut data = Map::new();
    data.insert("timestamp".into(), json!(0));
    client
        .send(Envelope::new("", "ping", data))
        .await
        .expect("ping should send");
    let pong = next_with_timeout(client).await;
    assert_eq!(pong.cmd, "pong");
}

async fn next_with_timeout(client: &mut Client) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("envelope should arrive in time")
        .expect("stream should stay open")
}

async fn assert_silent(client: &mut Client) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(outcome.is_err(), "connection should receive nothing");
}

#[tokio::test]
async fn broadcast_reaches_subscriber_but_not_origin_or_bystander() {
    let (_hub, addr) = start_relay().await;

    let mut a = Client::connect(addr).await.unwrap();
    let mut b = Client::connect(addr).await.unwrap();
    let mut c = Client::connect(addr).await.unwrap();

    a.subscribe("chat:channel:1").await.unwrap();
    barrier(&mut a).await;

    let msg_id = b
        .publish(
            "chat:channel:1",
            "message",
            object(json!({"from": "alice", "content": "hi"})),
        )
        .await
        .unwrap();

    let received = next_with_timeout(&mut a).await;
    assert_eq!(received.channel, "chat:channel:1");
    assert_eq!(received.cmd, "message");
    assert_eq!(received.msg_id, Some(msg_id));
    assert_eq!(received.data["from"], json!("alice"));
    assert_eq!(received.data["content"], json!("hi"));

    assert_silent(&mut b).await;
    assert_silent(&mut c).await;
}

#[tokio::test]
async fn ping_yields_one_pong_to_sender_only() {
    let (_hub, addr) = start_relay().await;

    let mut sender = Client::connect(addr).await.unwrap();
    let mut monitor = Client::connect(addr).await.unwrap();
    monitor.monitor(true).await.unwrap();
    barrier(&mut monitor).await;

    let mut data = Map::new();
    data.insert("timestamp".into(), json!(1234));
    sender.send(Envelope::new("", "ping", data)).await.unwrap();

    let pong = next_with_timeout(&mut sender).await;
    assert_eq!(pong.cmd, "pong");
    assert_eq!(pong.data["timestamp"], json!(1234));

    // Control traffic is never broadcast, so even a monitor sees nothing.
    assert_silent(&mut monitor).await;
}

#[tokio::test]
async fn monitor_receives_all_application_broadcasts() {
    let (_hub, addr) = start_relay().await;

    let mut monitor = Client::connect(addr).await.unwrap();
    monitor.monitor(true).await.unwrap();
    barrier(&mut monitor).await;

    let mut sender = Client::connect(addr).await.unwrap();
    sender
        .publish("some:channel", "message", object(json!({"n": 1})))
        .await
        .unwrap();
    sender
        .publish("other:channel", "message", object(json!({"n": 2})))
        .await
        .unwrap();

    let first = next_with_timeout(&mut monitor).await;
    let second = next_with_timeout(&mut monitor).await;
    assert_eq!(first.channel, "some:channel");
    assert_eq!(second.channel, "other:channel");
    assert_eq!(first.data["n"], json!(1));
    assert_eq!(second.data["n"], json!(2));
}

#[tokio::test]
async fn unsubscribe_stops_delivery_and_is_idempotent() {
    let (_hub, addr) = start_relay().await;

    let mut receiver = Client::connect(addr).await.unwrap();
    receiver.subscribe("c").await.unwrap();
    receiver.subscribe("c").await.unwrap(); // idempotent
    barrier(&mut receiver).await;

    let mut sender = Client::connect(addr).await.unwrap();
    sender.publish("c", "message", Map::new()).await.unwrap();
    let got = next_with_timeout(&mut receiver).await;
    assert_eq!(got.cmd, "message");

    receiver.unsubscribe("c").await.unwrap();
    receiver.unsubscribe("c").await.unwrap(); // no-op
    barrier(&mut receiver).await;

    sender.publish("c", "message", Map::new()).await.unwrap();
    assert_silent(&mut receiver).await;
}

#[tokio::test]
async fn reply_correlation_survives_the_relay() {
    let (_hub, addr) = start_relay().await;

    let mut requester = Client::connect(addr).await.unwrap();
    requester.subscribe("svc").await.unwrap();
    barrier(&mut requester).await;

    let mut responder = Client::connect(addr).await.unwrap();
    responder.subscribe("svc").await.unwrap();
    barrier(&mut responder).await;

    let request_id = requester
        .publish("svc", "do-thing", Map::new())
        .await
        .unwrap();

    let request = next_with_timeout(&mut responder).await;
    assert_eq!(request.msg_id, Some(request_id));

    let mut payload = Map::new();
    payload.insert("data".into(), json!({"ok": true}));
    responder
        .send(
            Envelope::new("svc", "do-thing:done", payload)
                .with_reply_to(request.msg_id),
        )
        .await
        .unwrap();

    let reply = next_with_timeout(&mut requester).await;
    assert_eq!(reply.cmd, "do-thing:done");
    assert_eq!(reply.reply_to, Some(request_id));
    assert_eq!(reply.data["ok"], json!(true));
}

// Raw-socket helpers for malformed-input tests.

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream) -> Value {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let len = u32::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    serde_json::from_slice(&payload).unwrap()
}

#[tokio::test]
async fn malformed_frame_gets_error_reply_and_connection_survives() {
    let (_hub, addr) = start_relay().await;

    let mut subscriber = Client::connect(addr).await.unwrap();
    subscriber.subscribe("c").await.unwrap();
    barrier(&mut subscriber).await;

    let mut raw = TcpStream::connect(addr).await.unwrap();

    // Valid JSON but no `cmd`: schema-malformed at decode.
    let id = Uuid::new_v4();
    let bad = format!(r#"{{"channel": "c", "msgId": "{id}"}}"#);
    write_frame(&mut raw, bad.as_bytes()).await;

    let reply = read_frame(&mut raw).await;
    assert_eq!(reply["cmd"], json!("error"));
    assert_eq!(reply["channel"], json!("c"));
    assert_eq!(reply["replyTo"], json!(id.to_string()));
    assert!(reply["error"].as_str().unwrap().contains("cmd"));

    // The fault never reaches subscribers.
    assert_silent(&mut subscriber).await;

    // And the same connection keeps working.
    let ping = json!({"channel": "", "cmd": "ping", "timestamp": 7});
    write_frame(&mut raw, ping.to_string().as_bytes()).await;
    let pong = read_frame(&mut raw).await;
    assert_eq!(pong["cmd"], json!("pong"));
    assert_eq!(pong["timestamp"], json!(7));
}

#[tokio::test]
async fn oversized_length_prefix_is_reported_without_disconnect() {
    let (_hub, addr) = start_relay().await;

    let mut raw = TcpStream::connect(addr).await.unwrap();

    // Declared length far beyond the payload sanity bound.
    raw.write_all(&(64 * 1024 * 1024u32).to_le_bytes())
        .await
        .unwrap();

    let reply = read_frame(&mut raw).await;
    assert_eq!(reply["cmd"], json!("error"));
    assert!(reply["error"].as_str().unwrap().contains("too large"));
}

#[tokio::test]
async fn frame_split_across_arbitrary_writes_still_decodes() {
    let (_hub, addr) = start_relay().await;

    let mut raw = TcpStream::connect(addr).await.unwrap();

    let ping = json!({"channel": "", "cmd": "ping", "timestamp": 42}).to_string();
    let mut wire = (ping.len() as u32).to_le_bytes().to_vec();
    wire.extend_from_slice(ping.as_bytes());

    for byte in wire {
        raw.write_all(&[byte]).await.unwrap();
        raw.flush().await.unwrap();
    }

    let pong = read_frame(&mut raw).await;
    assert_eq!(pong["cmd"], json!("pong"));
    assert_eq!(pong["timestamp"], json!(42));
}

#[tokio::test]
async fn disconnect_unregisters_from_roster() {
    let (hub, addr) = start_relay().await;

    let client = Client::connect(addr).await.unwrap();
    let other = Client::connect(addr).await.unwrap();
    wait_for_roster(&hub, 2).await;

    drop(client);

    // The serve task notices EOF and drops the registration.
    wait_for_roster(&hub, 1).await;
    drop(other);
    wait_for_roster(&hub, 0).await;
}

async fn wait_for_roster(hub: &Hub, want: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while hub.len() != want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "roster should reach {want} connections"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
