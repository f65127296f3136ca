//! Integration tests for the WebSocket transport.
//!
//! These upgrade real WebSocket connections through the warp filter and
//! verify:
//! - Lifecycle events and close reasons
//! - Envelope framing in both directions
//! - Origin checks on the handshake
//! - A coordinator driven end to end over sockets

use std::sync::Arc;
use std::time::Duration;

use playsync_coordinator::{
    CoordinatorConfig, Envelope, OutboundEvent, OutboundMessage, SyncCoordinator, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use warp::test::WsClient;
use warp::ws::Message;
use ws_server::{routes, run_event_loop, CloseReason, ConnectionEvent, ConnectionRouter, ServerConfig};

fn setup() -> (Arc<ConnectionRouter>, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ConnectionRouter::new(tx, 32)), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("Timeout waiting for connection event")
        .expect("Event channel closed")
}

/// Read frames until one carries `event`
async fn recv_event(client: &mut WsClient, event: &str) -> Value {
    loop {
        let message = timeout(Duration::from_secs(1), client.recv())
            .await
            .unwrap_or_else(|_| panic!("Timeout waiting for {}", event))
            .expect("Socket closed");
        let Ok(text) = message.to_str() else {
            continue;
        };
        let envelope = Envelope::decode(text).expect("Server sent a malformed envelope");
        if envelope.event == event {
            return envelope.data;
        }
    }
}

/// Test the full lifecycle of one socket: open, inbound, outbound, client close.
#[tokio::test]
async fn test_socket_lifecycle() {
    let config = ServerConfig::local();
    let (router, mut events) = setup();
    let filter = routes(&config, router.clone());

    let mut client = warp::test::ws()
        .path("/ws")
        .handshake(filter)
        .await
        .expect("handshake");

    let ConnectionEvent::Connected { id } = next_event(&mut events).await else {
        panic!("expected Connected first");
    };
    assert!(router.is_open(&id));

    client
        .send_text(r#"{"event":"identify","data":{"type":"tv","name":"Lobby"}}"#)
        .await;
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Message {
            id: id.clone(),
            event: "identify".to_string(),
            data: json!({ "type": "tv", "name": "Lobby" }),
        }
    );

    router.send(
        &id,
        &OutboundMessage::new(OutboundEvent::HostUpdate, json!({ "hostId": id })),
    );
    let data = recv_event(&mut client, "hostUpdate").await;
    assert_eq!(data, json!({ "hostId": id }));

    client.send(Message::close()).await;
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected {
            id: id.clone(),
            reason: CloseReason::ClientDisconnect,
        }
    );
    assert!(!router.is_open(&id));
}

/// Test that malformed text frames and binary frames never reach the channel.
#[tokio::test]
async fn test_bad_frames_are_dropped() {
    let config = ServerConfig::local();
    let (router, mut events) = setup();
    let mut client = warp::test::ws()
        .path("/ws")
        .handshake(routes(&config, router))
        .await
        .expect("handshake");
    let ConnectionEvent::Connected { id } = next_event(&mut events).await else {
        panic!("expected Connected first");
    };

    client.send_text("definitely not json").await;
    client.send_text(r#"{"event":"","data":{}}"#).await;
    client.send(Message::binary(vec![1u8, 2, 3])).await;
    client.send_text(r#"{"event":"pong"}"#).await;

    // Only the valid envelope arrives; missing data decodes as null
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Message {
            id,
            event: "pong".to_string(),
            data: Value::Null,
        }
    );
}

/// Test that a server-side disconnect closes the socket and is reported.
#[tokio::test]
async fn test_server_disconnect() {
    let config = ServerConfig::local();
    let (router, mut events) = setup();
    let mut client = warp::test::ws()
        .path("/ws")
        .handshake(routes(&config, router.clone()))
        .await
        .expect("handshake");
    let ConnectionEvent::Connected { id } = next_event(&mut events).await else {
        panic!("expected Connected first");
    };

    router.disconnect(&id);

    timeout(Duration::from_secs(1), client.recv_closed())
        .await
        .expect("Timeout waiting for close")
        .expect("close");
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected {
            id,
            reason: CloseReason::ServerDisconnect,
        }
    );
}

/// Test that handshakes from origins outside the allow-list fail.
#[tokio::test]
async fn test_origin_allow_list() {
    let config = ServerConfig::local().with_allowed_origins(["https://remote.example"]);
    let (router, mut events) = setup();
    let filter = routes(&config, router);

    let rejected = warp::test::ws()
        .path("/ws")
        .header("origin", "https://evil.example")
        .handshake(filter.clone())
        .await;
    assert!(rejected.is_err());
    assert!(events.try_recv().is_err());

    let accepted = warp::test::ws()
        .path("/ws")
        .header("origin", "https://remote.example")
        .handshake(filter)
        .await;
    assert!(accepted.is_ok());
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected { .. }
    ));
}

/// Test a display and a controller talking to a coordinator over sockets.
#[tokio::test]
async fn test_coordinator_over_websocket() {
    let config = ServerConfig::local();
    let (router, events) = setup();
    let transport: Arc<dyn Transport> = router.clone();
    let coordinator = SyncCoordinator::new(CoordinatorConfig::no_heartbeat(), transport)
        .expect("coordinator");
    let pump = tokio::spawn(run_event_loop(coordinator.clone(), events));
    let filter = routes(&config, router.clone());

    let mut display = warp::test::ws()
        .path("/ws")
        .handshake(filter.clone())
        .await
        .expect("display handshake");
    display
        .send_text(r#"{"event":"identify","data":{"type":"tv","name":"Lobby"}}"#)
        .await;
    let host = recv_event(&mut display, "hostUpdate").await;
    let display_id = host["hostId"].as_str().expect("host id").to_string();

    let mut controller = warp::test::ws()
        .path("/ws")
        .handshake(filter)
        .await
        .expect("controller handshake");
    controller
        .send_text(r#"{"event":"identify","data":{"type":"controller"}}"#)
        .await;
    let list = recv_event(&mut controller, "tvListUpdate").await;
    assert_eq!(list[0]["id"], json!(display_id));
    assert_eq!(list[0]["name"], json!("Lobby"));
    assert_eq!(list[0]["isHost"], json!(true));

    let command = json!({ "event": "command", "data": { "action": "play", "tvIds": [display_id] } });
    controller.send_text(command.to_string()).await;
    let forwarded = recv_event(&mut display, "command").await;
    assert_eq!(forwarded["action"], json!("play"));
    assert_eq!(forwarded["synchronized"], json!(false));

    display
        .send_text(r#"{"event":"tvStateUpdate","data":{"state":{"isPlaying":true}}}"#)
        .await;
    let current = recv_event(&mut controller, "currentState").await;
    assert_eq!(current["isPlaying"], json!(true));

    // A client close frame evicts the display at once
    display.send(Message::close()).await;
    let removed = recv_event(&mut controller, "tvDisconnected").await;
    assert_eq!(removed["tvId"], json!(display_id));
    assert_eq!(coordinator.host(), None);

    drop(router);
    pump.abort();
}
