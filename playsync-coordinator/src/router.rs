//! Broadcast router
//!
//! Computes the audience for each outbound message and hands the result to
//! the transport. Handlers build a list of [`Outbound`] values while holding
//! the coordinator lock; [`dispatch`] runs after the lock is released.

use serde_json::Value;

use crate::model::{ConnectionId, Role};
use crate::protocol::{DisplaySummary, OutboundEvent, OutboundMessage, Targeting};
use crate::registry::EndpointRegistry;
use crate::transport::Transport;

/// Who receives an outbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    One(ConnectionId),
    Many(Vec<ConnectionId>),
    /// Every open connection, identified or not
    Everyone,
}

/// A message paired with its audience
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub audience: Audience,
    pub message: OutboundMessage,
}

impl Outbound {
    pub fn to(id: &ConnectionId, event: OutboundEvent, payload: Value) -> Self {
        Self {
            audience: Audience::One(id.clone()),
            message: OutboundMessage::new(event, payload),
        }
    }

    pub fn many(ids: Vec<ConnectionId>, event: OutboundEvent, payload: Value) -> Self {
        Self {
            audience: Audience::Many(ids),
            message: OutboundMessage::new(event, payload),
        }
    }

    pub fn everyone(event: OutboundEvent, payload: Value) -> Self {
        Self {
            audience: Audience::Everyone,
            message: OutboundMessage::new(event, payload),
        }
    }
}

/// Hand each message to the transport
pub fn dispatch(transport: &dyn Transport, outbound: Vec<Outbound>) {
    for item in outbound {
        match &item.audience {
            Audience::One(id) => transport.send(id, &item.message),
            Audience::Many(ids) => {
                for id in ids {
                    transport.send(id, &item.message);
                }
            }
            Audience::Everyone => transport.broadcast(&item.message, &[]),
        }
    }
}

/// Targets of a playback command
///
/// An explicit `tvIds`/`targetIds` list wins, deduplicated in order and
/// filtered to connected displays. Without one, every connected display.
pub fn command_targets(registry: &EndpointRegistry, targeting: &Targeting) -> Vec<ConnectionId> {
    match &targeting.tv_ids {
        Some(ids) => connected_displays(registry, ids),
        None => registry.connected_ids(Role::Display),
    }
}

/// Targets of a playlist or seek update
///
/// An explicit list wins; otherwise the single `tvId` when not in sync mode;
/// otherwise every connected display.
pub fn update_targets(registry: &EndpointRegistry, targeting: &Targeting) -> Vec<ConnectionId> {
    if let Some(ids) = &targeting.tv_ids {
        return connected_displays(registry, ids);
    }
    match (&targeting.tv_id, targeting.is_sync_mode.unwrap_or(false)) {
        (Some(id), false) => connected_displays(registry, std::slice::from_ref(id)),
        _ => registry.connected_ids(Role::Display),
    }
}

fn connected_displays(registry: &EndpointRegistry, ids: &[ConnectionId]) -> Vec<ConnectionId> {
    let mut targets: Vec<ConnectionId> = Vec::with_capacity(ids.len());
    for id in ids {
        let connected = registry
            .find(id)
            .map_or(false, |e| e.is_display() && e.is_connected());
        if connected && !targets.contains(id) {
            targets.push(id.clone());
        }
    }
    targets
}

/// Connected controllers
pub fn controllers(registry: &EndpointRegistry) -> Vec<ConnectionId> {
    registry.connected_ids(Role::Controller)
}

/// Connected controllers other than `id`
pub fn other_controllers(registry: &EndpointRegistry, id: &ConnectionId) -> Vec<ConnectionId> {
    without(controllers(registry), id)
}

/// Connected displays other than `id`
pub fn other_displays(registry: &EndpointRegistry, id: &ConnectionId) -> Vec<ConnectionId> {
    without(registry.connected_ids(Role::Display), id)
}

fn without(mut ids: Vec<ConnectionId>, id: &ConnectionId) -> Vec<ConnectionId> {
    ids.retain(|other| other != id);
    ids
}

/// `tvListUpdate` payload: every registered display with state and host flag
pub fn display_list(registry: &EndpointRegistry) -> Value {
    let displays: Vec<DisplaySummary> = registry
        .displays()
        .into_iter()
        .map(DisplaySummary::from)
        .collect();
    serde_json::to_value(displays).unwrap_or_else(|_| Value::Array(Vec::new()))
}
