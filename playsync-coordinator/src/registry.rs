//! Endpoint registry
//!
//! Holds at most one record per connection id, keyed by id and listed in
//! registration order. The registry never emits messages; callers decide who
//! hears about a change.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::model::{placeholder_name, ConnectionId, Endpoint, EndpointState, Presence, Role};

/// Outcome of [`EndpointRegistry::register`]
#[derive(Debug, Clone)]
pub struct Registration {
    /// The record as stored after registration
    pub endpoint: Endpoint,
    /// Presence of the record this registration replaced, if any
    pub replaced: Option<Presence>,
}

impl Registration {
    pub fn is_new(&self) -> bool {
        self.replaced.is_none()
    }
}

/// Live set of endpoints and their last known state
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: HashMap<ConnectionId, Endpoint>,
    next_seq: u64,
    name_prefix: String,
}

impl EndpointRegistry {
    /// Create an empty registry that names anonymous endpoints `<prefix>-xxxxxx`
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            endpoints: HashMap::new(),
            next_seq: 1,
            name_prefix: name_prefix.into(),
        }
    }

    /// Create or replace the record for `id`
    ///
    /// A replacement keeps the original role, registration order and host
    /// flag, and merges `initial_state` onto the previous state. The record
    /// is always `Connected` afterwards.
    ///
    /// # Arguments
    /// * `id` - Transport-assigned connection id
    /// * `role` - Requested role; ignored when replacing an existing record
    /// * `display_name` - Name to show; a placeholder is generated when absent
    /// * `initial_state` - State reported alongside the identification
    /// * `now` - Registration time in Unix milliseconds
    pub fn register(
        &mut self,
        id: ConnectionId,
        role: Role,
        display_name: Option<String>,
        initial_state: EndpointState,
        now: u64,
    ) -> Registration {
        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        if let Some(existing) = self.endpoints.get_mut(&id) {
            if existing.role != role {
                warn!(
                    connection = %id,
                    registered = %existing.role,
                    requested = %role,
                    "Ignoring role change on re-identification"
                );
            }
            let replaced = existing.presence;
            if let Some(name) = display_name {
                existing.display_name = name;
            }
            existing.last_state.merge(initial_state);
            existing.presence = Presence::Connected;

            debug!(connection = %id, "Replaced endpoint registration");
            return Registration {
                endpoint: existing.clone(),
                replaced: Some(replaced),
            };
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let endpoint = Endpoint {
            id: id.clone(),
            role,
            display_name: display_name.unwrap_or_else(|| placeholder_name(&self.name_prefix)),
            is_host: false,
            last_state: initial_state,
            registered_seq: seq,
            registered_at: now,
            presence: Presence::Connected,
        };
        self.endpoints.insert(id, endpoint.clone());

        Registration {
            endpoint,
            replaced: None,
        }
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Endpoint> {
        self.endpoints.remove(id)
    }

    pub fn find(&self, id: &ConnectionId) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    pub fn find_mut(&mut self, id: &ConnectionId) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.endpoints.contains_key(id)
    }

    /// Endpoints of `role` in registration order
    pub fn list_by_role(&self, role: Role) -> Vec<&Endpoint> {
        let mut endpoints: Vec<&Endpoint> =
            self.endpoints.values().filter(|e| e.role == role).collect();
        endpoints.sort_by_key(|e| e.registered_seq);
        endpoints
    }

    pub fn displays(&self) -> Vec<&Endpoint> {
        self.list_by_role(Role::Display)
    }

    pub fn controllers(&self) -> Vec<&Endpoint> {
        self.list_by_role(Role::Controller)
    }

    /// Ids of connected endpoints of `role`, in registration order
    pub fn connected_ids(&self, role: Role) -> Vec<ConnectionId> {
        self.list_by_role(role)
            .into_iter()
            .filter(|e| e.is_connected())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Whether `id` is a registered display
    pub fn is_display(&self, id: &ConnectionId) -> bool {
        self.find(id).map_or(false, Endpoint::is_display)
    }

    /// Merge `partial` into the endpoint's state; unknown ids are ignored
    pub fn update_state(&mut self, id: &ConnectionId, partial: EndpointState) -> bool {
        match self.endpoints.get_mut(id) {
            Some(endpoint) => {
                endpoint.last_state.merge(partial);
                true
            }
            None => false,
        }
    }

    /// Replace the endpoint's reported state wholesale
    ///
    /// Bookkeeping timestamps kept by the coordinator survive.
    pub fn replace_state(&mut self, id: &ConnectionId, state: EndpointState) -> bool {
        match self.endpoints.get_mut(id) {
            Some(endpoint) => {
                let previous = std::mem::replace(&mut endpoint.last_state, state);
                let current = &mut endpoint.last_state;
                current.last_heartbeat = current.last_heartbeat.or(previous.last_heartbeat);
                current.last_state_received =
                    current.last_state_received.or(previous.last_state_received);
                current.last_buffer_update =
                    current.last_buffer_update.or(previous.last_buffer_update);
                current.last_error = current.last_error.take().or(previous.last_error);
                current.last_error_timestamp =
                    current.last_error_timestamp.or(previous.last_error_timestamp);
                true
            }
            None => false,
        }
    }

    /// Mark an endpoint as transiently disconnected
    pub fn mark_pending(&mut self, id: &ConnectionId) -> bool {
        self.set_presence(id, Presence::PendingRemoval)
    }

    /// Mark a pending endpoint as connected again
    pub fn restore(&mut self, id: &ConnectionId) -> bool {
        self.set_presence(id, Presence::Connected)
    }

    fn set_presence(&mut self, id: &ConnectionId, presence: Presence) -> bool {
        match self.endpoints.get_mut(id) {
            Some(endpoint) => {
                endpoint.presence = presence;
                true
            }
            None => false,
        }
    }

    /// Move the record at `old` to `new`, keeping everything but the id
    ///
    /// Fails if `old` is unknown or `new` is already taken.
    pub fn rekey(&mut self, old: &ConnectionId, new: &ConnectionId) -> bool {
        if old == new || self.endpoints.contains_key(new) {
            return false;
        }
        match self.endpoints.remove(old) {
            Some(mut endpoint) => {
                endpoint.id = new.clone();
                self.endpoints.insert(new.clone(), endpoint);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new("TV")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::new(s)
    }

    fn register(registry: &mut EndpointRegistry, name: &str, role: Role) -> Registration {
        registry.register(id(name), role, Some(name.to_string()), EndpointState::default(), 0)
    }

    #[test]
    fn test_register_new_endpoint() {
        let mut registry = EndpointRegistry::default();
        let registration = register(&mut registry, "d1", Role::Display);

        assert!(registration.is_new());
        assert_eq!(registration.endpoint.display_name, "d1");
        assert_eq!(registration.endpoint.presence, Presence::Connected);
        assert!(!registration.endpoint.is_host);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_placeholder_name_when_absent() {
        let mut registry = EndpointRegistry::new("Screen");
        let registration = registry.register(
            id("d1"),
            Role::Display,
            Some("   ".to_string()),
            EndpointState::default(),
            0,
        );
        assert!(registration.endpoint.display_name.starts_with("Screen-"));
    }

    #[test]
    fn test_reregister_replaces_without_duplicating() {
        let mut registry = EndpointRegistry::default();
        registry.register(
            id("d1"),
            Role::Display,
            None,
            EndpointState {
                duration: Some(120.0),
                ..Default::default()
            },
            0,
        );
        registry.find_mut(&id("d1")).unwrap().is_host = true;

        let registration = registry.register(
            id("d1"),
            Role::Controller,
            Some("Living room".to_string()),
            EndpointState {
                current_time: Some(5.0),
                ..Default::default()
            },
            10,
        );

        assert_eq!(registration.replaced, Some(Presence::Connected));
        assert_eq!(registry.len(), 1);
        let endpoint = registry.find(&id("d1")).unwrap();
        assert_eq!(endpoint.role, Role::Display);
        assert!(endpoint.is_host);
        assert_eq!(endpoint.registered_seq, 1);
        assert_eq!(endpoint.display_name, "Living room");
        assert_eq!(endpoint.last_state.duration, Some(120.0));
        assert_eq!(endpoint.last_state.current_time, Some(5.0));
    }

    #[test]
    fn test_list_by_role_in_registration_order() {
        let mut registry = EndpointRegistry::default();
        for name in ["c", "a", "b"] {
            register(&mut registry, name, Role::Display);
        }
        register(&mut registry, "ctrl", Role::Controller);

        let names: Vec<&str> = registry.displays().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(registry.controllers().len(), 1);
    }

    #[test]
    fn test_update_state_unknown_is_noop() {
        let mut registry = EndpointRegistry::default();
        assert!(!registry.update_state(&id("ghost"), EndpointState::default()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replace_state_keeps_bookkeeping() {
        let mut registry = EndpointRegistry::default();
        register(&mut registry, "d1", Role::Display);
        registry.update_state(
            &id("d1"),
            EndpointState {
                current_time: Some(1.0),
                last_heartbeat: Some(99),
                ..Default::default()
            },
        );

        registry.replace_state(
            &id("d1"),
            EndpointState {
                duration: Some(60.0),
                ..Default::default()
            },
        );

        let state = &registry.find(&id("d1")).unwrap().last_state;
        assert_eq!(state.current_time, None);
        assert_eq!(state.duration, Some(60.0));
        assert_eq!(state.last_heartbeat, Some(99));
    }

    #[test]
    fn test_pending_and_restore() {
        let mut registry = EndpointRegistry::default();
        register(&mut registry, "d1", Role::Display);

        assert!(registry.mark_pending(&id("d1")));
        assert!(registry.connected_ids(Role::Display).is_empty());
        assert!(registry.restore(&id("d1")));
        assert_eq!(registry.connected_ids(Role::Display), vec![id("d1")]);
    }

    #[test]
    fn test_rekey() {
        let mut registry = EndpointRegistry::default();
        register(&mut registry, "old", Role::Display);
        register(&mut registry, "other", Role::Display);

        assert!(!registry.rekey(&id("old"), &id("other")));
        assert!(registry.rekey(&id("old"), &id("new")));
        assert!(registry.find(&id("old")).is_none());

        let endpoint = registry.find(&id("new")).unwrap();
        assert_eq!(endpoint.id, id("new"));
        assert_eq!(endpoint.registered_seq, 1);
    }
}
