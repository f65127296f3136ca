//! Connection routing for the WebSocket server.
//!
//! The `ConnectionRouter` owns one outbound queue per open socket. Inbound
//! frames are decoded into [`ConnectionEvent`]s and pushed to a channel;
//! outbound messages from the coordinator arrive through the [`Transport`]
//! implementation and are queued as text frames.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use playsync_coordinator::{ConnectionId, Envelope, OutboundMessage, Transport};

/// Why a socket closed, as reported to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The socket ended without a close frame or failed
    TransportClose,
    /// The client sent a close frame
    ClientDisconnect,
    /// The server closed the socket
    ServerDisconnect,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TransportClose => "transport close",
            CloseReason::ClientDisconnect => "client namespace disconnect",
            CloseReason::ServerDisconnect => "server namespace disconnect",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle and inbound traffic of one connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected {
        id: ConnectionId,
    },
    Disconnected {
        id: ConnectionId,
        reason: CloseReason,
    },
    Message {
        id: ConnectionId,
        event: String,
        data: Value,
    },
}

/// Work for a connection's socket task
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// A serialized envelope
    Frame(String),
    /// Close the socket from our side
    Close,
}

/// Routes frames between sockets and the event channel
pub struct ConnectionRouter {
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<Outgoing>>>,
    event_sender: mpsc::UnboundedSender<ConnectionEvent>,
    capacity: usize,
}

impl ConnectionRouter {
    /// Create a router
    ///
    /// # Arguments
    ///
    /// * `event_sender` - Channel receiving every [`ConnectionEvent`]
    /// * `capacity` - Outbound frames buffered per connection
    pub fn new(event_sender: mpsc::UnboundedSender<ConnectionEvent>, capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            event_sender,
            capacity: capacity.max(1),
        }
    }

    /// Register a new socket under a fresh id and announce it
    ///
    /// Returns the id and the queue the socket task drains.
    pub fn open(&self) -> (ConnectionId, mpsc::Receiver<Outgoing>) {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.write().insert(id.clone(), tx);

        debug!(connection = %id, "Socket opened");
        self.emit(ConnectionEvent::Connected { id: id.clone() });
        (id, rx)
    }

    /// Forget a socket and announce why it closed
    pub fn close(&self, id: &ConnectionId, reason: CloseReason) {
        self.connections.write().remove(id);
        debug!(connection = %id, reason = %reason, "Socket closed");
        self.emit(ConnectionEvent::Disconnected {
            id: id.clone(),
            reason,
        });
    }

    /// Decode a text frame and forward it as a [`ConnectionEvent::Message`]
    ///
    /// Returns `false` when the frame is not a valid envelope; it is dropped.
    pub fn route_frame(&self, id: &ConnectionId, text: &str) -> bool {
        match Envelope::decode(text) {
            Ok(envelope) => {
                self.emit(ConnectionEvent::Message {
                    id: id.clone(),
                    event: envelope.event,
                    data: envelope.data,
                });
                true
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "Dropping malformed frame");
                false
            }
        }
    }

    /// Ask every open socket to close
    pub fn close_all(&self) {
        let connections = self.connections.read();
        for (id, tx) in connections.iter() {
            self.enqueue(id, tx, Outgoing::Close);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_open(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means the process is shutting down
        let _ = self.event_sender.send(event);
    }

    fn enqueue(&self, id: &ConnectionId, tx: &mpsc::Sender<Outgoing>, item: Outgoing) {
        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(connection = %id, "Outbound queue full; dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = %id, "Outbound queue closed");
            }
        }
    }
}

impl Transport for ConnectionRouter {
    fn send(&self, to: &ConnectionId, message: &OutboundMessage) {
        let connections = self.connections.read();
        let Some(tx) = connections.get(to) else {
            debug!(connection = %to, event = %message.event, "Send to unknown connection");
            return;
        };
        let frame = Envelope::from(message).encode();
        self.enqueue(to, tx, Outgoing::Frame(frame));
    }

    fn broadcast(&self, message: &OutboundMessage, exclude: &[ConnectionId]) {
        let frame = Envelope::from(message).encode();
        let connections = self.connections.read();
        for (id, tx) in connections.iter().filter(|(id, _)| !exclude.contains(id)) {
            self.enqueue(id, tx, Outgoing::Frame(frame.clone()));
        }
    }

    fn disconnect(&self, id: &ConnectionId) {
        // Dropping the sender also ends the socket task if the queue is full
        if let Some(tx) = self.connections.write().remove(id) {
            self.enqueue(id, &tx, Outgoing::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playsync_coordinator::OutboundEvent;
    use serde_json::json;

    fn router(capacity: usize) -> (ConnectionRouter, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionRouter::new(tx, capacity), rx)
    }

    #[tokio::test]
    async fn test_open_announces_connection() {
        let (router, mut events) = router(8);
        let (id, _outgoing) = router.open();

        assert!(router.is_open(&id));
        assert_eq!(router.connection_count(), 1);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Connected { id }
        );
    }

    #[tokio::test]
    async fn test_route_frame() {
        let (router, mut events) = router(8);
        let (id, _outgoing) = router.open();
        events.recv().await.unwrap();

        assert!(router.route_frame(&id, r#"{"event":"heartbeat","data":{"state":{}}}"#));
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Message {
                id: id.clone(),
                event: "heartbeat".to_string(),
                data: json!({ "state": {} }),
            }
        );

        assert!(!router.route_frame(&id, "not json"));
        assert!(!router.route_frame(&id, r#"{"data":{}}"#));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_and_broadcast() {
        let (router, _events) = router(8);
        let (a, mut a_out) = router.open();
        let (_b, mut b_out) = router.open();

        let message = OutboundMessage::new(OutboundEvent::Pong, json!({ "timestamp": 1 }));
        router.send(&a, &message);
        let frame = a_out.recv().await.unwrap();
        let Outgoing::Frame(text) = frame else {
            panic!("expected a frame");
        };
        let envelope = Envelope::decode(&text).unwrap();
        assert_eq!(envelope.event, "pong");
        assert_eq!(envelope.data, json!({ "timestamp": 1 }));

        router.broadcast(&message, &[a.clone()]);
        assert!(matches!(b_out.recv().await, Some(Outgoing::Frame(_))));
        assert!(a_out.try_recv().is_err());

        // Unknown targets are ignored
        router.send(&ConnectionId::new("ghost"), &message);
        assert!(b_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames() {
        let (router, _events) = router(1);
        let (id, mut outgoing) = router.open();
        let message = OutboundMessage::new(OutboundEvent::Ping, json!({}));

        router.send(&id, &message);
        router.send(&id, &message);

        assert!(outgoing.recv().await.is_some());
        assert!(outgoing.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_and_close() {
        let (router, mut events) = router(8);
        let (id, mut outgoing) = router.open();
        events.recv().await.unwrap();

        router.disconnect(&id);
        assert!(!router.is_open(&id));
        assert_eq!(outgoing.recv().await, Some(Outgoing::Close));
        assert_eq!(outgoing.recv().await, None);

        router.close(&id, CloseReason::ServerDisconnect);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Disconnected {
                id,
                reason: CloseReason::ServerDisconnect,
            }
        );
    }

    #[test]
    fn test_close_reason_strings() {
        assert_eq!(CloseReason::TransportClose.as_str(), "transport close");
        assert_eq!(
            CloseReason::ClientDisconnect.to_string(),
            "client namespace disconnect"
        );
        assert_eq!(
            CloseReason::ServerDisconnect.as_str(),
            "server namespace disconnect"
        );
    }
}
