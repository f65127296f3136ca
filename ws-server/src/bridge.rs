//! Feeds connection events into a coordinator

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use playsync_coordinator::SyncCoordinator;

use crate::router::ConnectionEvent;

/// Apply one connection event to the coordinator
pub fn dispatch_event(coordinator: &SyncCoordinator, event: ConnectionEvent) {
    match event {
        ConnectionEvent::Connected { id } => coordinator.handle_connect(&id),
        ConnectionEvent::Disconnected { id, reason } => {
            coordinator.handle_disconnect(&id, reason.as_str())
        }
        ConnectionEvent::Message { id, event, data } => {
            if let Err(e) = coordinator.handle_message(&id, &event, data) {
                debug!(connection = %id, event = %event, error = %e, "Message rejected");
            }
        }
    }
}

/// Drain `events` into `coordinator` until every sender is gone
///
/// Events are applied in arrival order, so a connection's `Connected` is
/// always seen before its messages.
pub async fn run_event_loop(
    coordinator: Arc<SyncCoordinator>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        dispatch_event(&coordinator, event);
    }
    debug!("Connection event channel closed");
}
