//! Transport seam
//!
//! The coordinator never owns sockets. It hands outbound messages to a
//! [`Transport`] and is told about connects, disconnects and inbound events by
//! whoever drives the connections. Delivery is fire-and-forget: sends to
//! unknown or closed connections are dropped silently.

use parking_lot::Mutex;

use crate::model::ConnectionId;
use crate::protocol::{OutboundEvent, OutboundMessage};

/// Outbound half of the duplex messaging substrate
pub trait Transport: Send + Sync {
    /// Deliver `message` to one connection
    fn send(&self, to: &ConnectionId, message: &OutboundMessage);

    /// Deliver `message` to every open connection except `exclude`
    fn broadcast(&self, message: &OutboundMessage, exclude: &[ConnectionId]);

    /// Close a connection from the server side
    fn disconnect(&self, id: &ConnectionId);
}

/// A delivery captured by [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Sent {
        to: ConnectionId,
        message: OutboundMessage,
    },
    Broadcast {
        message: OutboundMessage,
        exclude: Vec<ConnectionId>,
    },
    Disconnected(ConnectionId),
}

/// In-memory transport that records every delivery
///
/// Useful for tests and for embedding the coordinator behind a transport
/// that drains deliveries itself.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock())
    }

    pub fn clear(&self) {
        self.deliveries.lock().clear();
    }

    /// Messages `id` would have received, broadcasts included, in order
    pub fn messages_for(&self, id: &ConnectionId) -> Vec<OutboundMessage> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|delivery| match delivery {
                Delivery::Sent { to, message } if to == id => Some(message.clone()),
                Delivery::Broadcast { message, exclude } if !exclude.contains(id) => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Messages of one event type that `id` would have received
    pub fn events_for(&self, id: &ConnectionId, event: OutboundEvent) -> Vec<OutboundMessage> {
        self.messages_for(id)
            .into_iter()
            .filter(|m| m.event == event)
            .collect()
    }

    /// Connections closed through [`Transport::disconnect`]
    pub fn disconnected(&self) -> Vec<ConnectionId> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|delivery| match delivery {
                Delivery::Disconnected(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, to: &ConnectionId, message: &OutboundMessage) {
        self.deliveries.lock().push(Delivery::Sent {
            to: to.clone(),
            message: message.clone(),
        });
    }

    fn broadcast(&self, message: &OutboundMessage, exclude: &[ConnectionId]) {
        self.deliveries.lock().push(Delivery::Broadcast {
            message: message.clone(),
            exclude: exclude.to_vec(),
        });
    }

    fn disconnect(&self, id: &ConnectionId) {
        self.deliveries.lock().push(Delivery::Disconnected(id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_messages_for_includes_broadcasts() {
        let transport = RecordingTransport::new();
        let a = ConnectionId::new("a");
        let b = ConnectionId::new("b");

        transport.send(&a, &OutboundMessage::new(OutboundEvent::Pong, json!({})));
        transport.broadcast(
            &OutboundMessage::new(OutboundEvent::HostUpdate, json!({ "hostId": "a" })),
            &[b.clone()],
        );

        assert_eq!(transport.messages_for(&a).len(), 2);
        assert!(transport.messages_for(&b).is_empty());
        assert_eq!(transport.events_for(&a, OutboundEvent::HostUpdate).len(), 1);
    }

    #[test]
    fn test_take_drains() {
        let transport = RecordingTransport::new();
        transport.disconnect(&ConnectionId::new("a"));
        assert_eq!(transport.disconnected(), vec![ConnectionId::new("a")]);
        assert_eq!(transport.take().len(), 1);
        assert!(transport.deliveries().is_empty());
    }
}
