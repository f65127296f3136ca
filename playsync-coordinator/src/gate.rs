//! Buffering gate
//!
//! `play` and `pause` commands addressed to explicit displays are refused
//! while any addressed display reports that it is buffering below the low
//! threshold. Buffer reports below the low threshold also look for a
//! well-buffered peer that can send the starving display a full snapshot.

use tracing::debug;

use crate::model::{ConnectionId, Role};
use crate::protocol::Command;
use crate::registry::EndpointRegistry;

/// A refused playback command
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub display: ConnectionId,
    pub buffer_level: f64,
}

impl Rejection {
    pub fn message(&self) -> String {
        format!(
            "Insufficient buffer for playback on {} ({:.0}%)",
            self.display,
            self.buffer_level * 100.0
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferingGate {
    low: f64,
    healthy: f64,
}

impl BufferingGate {
    pub fn new(low: f64, healthy: f64) -> Self {
        Self { low, healthy }
    }

    /// Check a command against the buffer state of its explicit targets
    pub fn admit(
        &self,
        registry: &EndpointRegistry,
        command: &Command,
        targets: &[ConnectionId],
    ) -> Result<(), Rejection> {
        if !command.is_playback_control() || command.targeting.tv_ids.is_none() {
            return Ok(());
        }

        for id in targets {
            let Some(endpoint) = registry.find(id) else {
                continue;
            };
            if endpoint.last_state.is_starving(self.low) {
                let buffer_level = endpoint.last_state.buffer_level.unwrap_or(0.0);
                debug!(display = %id, buffer_level, action = %command.action, "Gate refused command");
                return Err(Rejection {
                    display: id.clone(),
                    buffer_level,
                });
            }
        }
        Ok(())
    }

    pub fn is_low(&self, buffer_level: Option<f64>) -> bool {
        buffer_level.map_or(false, |level| level < self.low)
    }

    /// First connected display other than `starving` with a healthy buffer
    pub fn replenishment_peer(
        &self,
        registry: &EndpointRegistry,
        starving: &ConnectionId,
    ) -> Option<ConnectionId> {
        registry
            .list_by_role(Role::Display)
            .into_iter()
            .filter(|e| e.is_connected() && &e.id != starving)
            .find(|e| e.last_state.buffer_level.map_or(false, |l| l > self.healthy))
            .map(|e| e.id.clone())
    }
}
