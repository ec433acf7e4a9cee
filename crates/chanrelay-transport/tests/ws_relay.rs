//! End-to-end relay behavior over WebSocket connections, including a mixed
//! TCP/WebSocket hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use chanrelay_core::Hub;
use chanrelay_transport::{Client, TcpRelayListener, WsRelayListener};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_ws_relay() -> (Arc<Hub>, SocketAddr) {
    let hub = Arc::new(Hub::new());
    let listener = WsRelayListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().unwrap();
    let serve_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        let _ = listener.serve(serve_hub).await;
    });
    (hub, addr)
}

async fn connect_ws(addr: SocketAddr) -> WsClient {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("websocket should connect");
    socket
}

async fn send_json(socket: &mut WsClient, value: &Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("message should send");
}

async fn recv_json(socket: &mut WsClient) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("message should arrive in time")
            .expect("stream should stay open")
            .expect("message should decode");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn assert_silent(socket: &mut WsClient) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(outcome.is_err(), "connection should receive nothing");
}

/// Ping round trip: once the pong is back, every earlier message on this
/// connection has been processed.
async fn barrier(socket: &mut WsClient) {
    send_json(socket, &json!({"channel": "", "cmd": "ping", "timestamp": 0})).await;
    let pong = recv_json(socket).await;
    assert_eq!(pong["cmd"], json!("pong"));
}

fn publish(channel: &str, cmd: &str, data: Value) -> (Value, Uuid) {
    let msg_id = Uuid::new_v4();
    let value = json!({
        "channel": channel,
        "cmd": cmd,
        "msgId": msg_id.to_string(),
        "data": data,
    });
    (value, msg_id)
}

#[tokio::test]
async fn broadcast_reaches_ws_subscriber_but_not_origin() {
    let (_hub, addr) = start_ws_relay().await;

    let mut subscriber = connect_ws(addr).await;
    send_json(
        &mut subscriber,
        &json!({"channel": "chat:channel:1", "cmd": "subscribe"}),
    )
    .await;
    barrier(&mut subscriber).await;

    let mut publisher = connect_ws(addr).await;
    let (message, msg_id) = publish("chat:channel:1", "message", json!({"content": "hi"}));
    send_json(&mut publisher, &message).await;

    let received = recv_json(&mut subscriber).await;
    assert_eq!(received["channel"], json!("chat:channel:1"));
    assert_eq!(received["cmd"], json!("message"));
    assert_eq!(received["msgId"], json!(msg_id.to_string()));
    assert_eq!(received["content"], json!("hi"));

    assert_silent(&mut publisher).await;
}

#[tokio::test]
async fn binary_messages_decode_like_text() {
    let (_hub, addr) = start_ws_relay().await;

    let mut socket = connect_ws(addr).await;
    let ping = json!({"channel": "", "cmd": "ping", "timestamp": 99});
    socket
        .send(Message::Binary(ping.to_string().into_bytes().into()))
        .await
        .unwrap();

    let pong = recv_json(&mut socket).await;
    assert_eq!(pong["cmd"], json!("pong"));
    assert_eq!(pong["timestamp"], json!(99));
}

#[tokio::test]
async fn malformed_message_gets_error_reply_and_connection_survives() {
    let (_hub, addr) = start_ws_relay().await;

    let mut socket = connect_ws(addr).await;
    socket
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();

    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["cmd"], json!("error"));
    assert!(reply["error"].as_str().unwrap().contains("JSON"));

    // Same connection keeps working afterwards.
    barrier(&mut socket).await;
}

#[tokio::test]
async fn application_command_without_msg_id_is_rejected() {
    let (_hub, addr) = start_ws_relay().await;

    let mut subscriber = connect_ws(addr).await;
    send_json(&mut subscriber, &json!({"channel": "c", "cmd": "subscribe"})).await;
    barrier(&mut subscriber).await;

    let mut sender = connect_ws(addr).await;
    send_json(
        &mut sender,
        &json!({"channel": "c", "cmd": "message", "data": {}}),
    )
    .await;

    let reply = recv_json(&mut sender).await;
    assert_eq!(reply["cmd"], json!("error"));
    assert_eq!(reply["channel"], json!("c"));

    // The rejected message never reaches the bus.
    assert_silent(&mut subscriber).await;
}

#[tokio::test]
async fn tcp_and_websocket_share_one_hub() {
    let hub = Arc::new(Hub::new());

    let tcp = TcpRelayListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let tcp_addr = tcp.local_addr().unwrap();
    let tcp_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        let _ = tcp.serve(tcp_hub).await;
    });

    let ws = WsRelayListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let ws_addr = ws.local_addr().unwrap();
    let ws_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        let _ = ws.serve(ws_hub).await;
    });

    let mut ws_subscriber = connect_ws(ws_addr).await;
    send_json(&mut ws_subscriber, &json!({"channel": "c", "cmd": "subscribe"})).await;
    barrier(&mut ws_subscriber).await;

    let mut tcp_publisher = Client::connect(tcp_addr).await.unwrap();
    let mut data = Map::new();
    data.insert("n".into(), json!(1));
    let msg_id = tcp_publisher.publish("c", "message", data).await.unwrap();

    let received = recv_json(&mut ws_subscriber).await;
    assert_eq!(received["cmd"], json!("message"));
    assert_eq!(received["msgId"], json!(msg_id.to_string()));
    assert_eq!(received["n"], json!(1));
}
