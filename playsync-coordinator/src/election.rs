//! Host election
//!
//! Exactly one display is host whenever at least one display is registered.
//! The earliest-registered display wins; connected displays are preferred
//! over ones waiting out a grace period.
//!
//! Elections run when a display registers and no host exists, and when the
//! host's record is removed. Controllers never influence the outcome.

use tracing::info;

use crate::model::{ConnectionId, Role};
use crate::registry::EndpointRegistry;

/// Tracks the current host and keeps the registry's host flags consistent
#[derive(Debug, Default)]
pub struct HostElection {
    host: Option<ConnectionId>,
}

impl HostElection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&ConnectionId> {
        self.host.as_ref()
    }

    pub fn is_host(&self, id: &ConnectionId) -> bool {
        self.host.as_ref() == Some(id)
    }

    /// Pick a host from the registry's displays
    ///
    /// Sets the winner's flag and clears every other display's flag.
    /// Returns `None` when no displays are registered.
    pub fn elect(&mut self, registry: &mut EndpointRegistry) -> Option<ConnectionId> {
        let displays = registry.list_by_role(Role::Display);
        let winner = displays
            .iter()
            .find(|e| e.is_connected())
            .or_else(|| displays.first())
            .map(|e| e.id.clone());
        let ids: Vec<ConnectionId> = displays.iter().map(|e| e.id.clone()).collect();

        for id in &ids {
            if let Some(endpoint) = registry.find_mut(id) {
                endpoint.is_host = Some(id) == winner.as_ref();
            }
        }

        if winner != self.host {
            match &winner {
                Some(id) => info!(host = %id, "Elected host display"),
                None => info!("No displays left; host cleared"),
            }
        }
        self.host = winner.clone();
        winner
    }

    /// Elect only when there is no valid host
    ///
    /// Returns `Some(new_host)` when an election changed the host (the inner
    /// value is `None` when the last display went away).
    pub fn ensure_host(
        &mut self,
        registry: &mut EndpointRegistry,
    ) -> Option<Option<ConnectionId>> {
        let valid = self
            .host
            .as_ref()
            .map_or(false, |id| registry.is_display(id));
        if valid {
            return None;
        }

        let previous = self.host.clone();
        let elected = self.elect(registry);
        if elected == previous {
            None
        } else {
            Some(elected)
        }
    }

    /// Follow a record that moved to a new connection id
    pub fn rekey(&mut self, old: &ConnectionId, new: &ConnectionId) {
        if self.host.as_ref() == Some(old) {
            self.host = Some(new.clone());
        }
    }
}
