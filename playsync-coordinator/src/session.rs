//! Session state and per-event handlers
//!
//! Everything here runs under the coordinator's lock. Handlers mutate the
//! registry and store, then return the messages to send; nothing is
//! delivered from inside a handler.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::election::HostElection;
use crate::gate::BufferingGate;
use crate::model::{ConnectionId, EndpointState, PlaybackPatch, Presence, Role};
use crate::protocol::{
    with_fields, BufferReport, ClientMessage, Command, FullState, Identify, OutboundEvent,
    RoutedUpdate,
};
use crate::reconnect::ReconnectionManager;
use crate::registry::EndpointRegistry;
use crate::router::{self, Outbound};
use crate::store::{Compensation, PlaybackStore, UpdateOutcome};

pub(crate) struct Session {
    pub registry: EndpointRegistry,
    pub election: HostElection,
    pub store: PlaybackStore,
    pub reconnection: ReconnectionManager,
    pub gate: BufferingGate,
    pub sync_enabled: bool,
}

impl Session {
    pub fn new(name_prefix: &str, gate: BufferingGate) -> Self {
        Self {
            registry: EndpointRegistry::new(name_prefix),
            election: HostElection::new(),
            store: PlaybackStore::new(),
            reconnection: ReconnectionManager::new(),
            gate,
            sync_enabled: false,
        }
    }

    pub fn handle(&mut self, id: &ConnectionId, message: ClientMessage, now: u64) -> Vec<Outbound> {
        match message {
            ClientMessage::Identify(identify) => self.identify(id, identify, now),
            ClientMessage::Heartbeat { state } => self.heartbeat(id, state, now),
            ClientMessage::Pong => Vec::new(),
            ClientMessage::BufferState(report) => self.buffer_state(id, report, now),
            ClientMessage::ToggleSync { enabled } => self.toggle_sync(enabled),
            ClientMessage::Command(command) => self.command(id, command, now),
            ClientMessage::SyncState(patch) => self.sync_state(id, patch, now),
            ClientMessage::MasterSync(patch) => self.master_sync(id, patch, now),
            ClientMessage::RequestTvState { tv_id } => self.request_tv_state(id, &tv_id, now),
            ClientMessage::PlaylistUpdate(update) => self.playlist_update(update, now),
            ClientMessage::Seek(update) => self.seek(update, now),
            ClientMessage::StateReceived { timestamp } => {
                self.registry.update_state(
                    id,
                    EndpointState {
                        last_state_received: Some(timestamp.unwrap_or(now)),
                        ..Default::default()
                    },
                );
                Vec::new()
            }
            ClientMessage::TvStateUpdate(report) => self.tv_state_update(id, report, now),
            ClientMessage::SongCompleted(data) => vec![Outbound::many(
                router::controllers(&self.registry),
                OutboundEvent::SongCompleted,
                data,
            )],
            ClientMessage::FullStateUpdate(full) => self.full_state_update(id, full, now),
            ClientMessage::SyncConfirm(data) => vec![Outbound::many(
                router::controllers(&self.registry),
                OutboundEvent::TvSyncConfirmed,
                data,
            )],
            ClientMessage::Error(detail) => self.endpoint_error(id, detail, now),
        }
    }

    fn identify(&mut self, id: &ConnectionId, identify: Identify, now: u64) -> Vec<Outbound> {
        let Identify {
            role,
            name,
            state,
            previous_id,
        } = identify;

        let resumed = match self.registry.find(id).map(|e| e.presence) {
            Some(Presence::PendingRemoval) => {
                self.reconnection.cancel_grace(id);
                true
            }
            Some(Presence::Connected) => false,
            None => match previous_id.filter(|previous| previous != id) {
                Some(previous) => self.resume(&previous, id),
                None => false,
            },
        };

        let mut initial = state.unwrap_or_default();
        initial.timestamp = Some(now);
        let registration = self.registry.register(id.clone(), role, name, initial, now);
        let endpoint = registration.endpoint;

        info!(
            connection = %id,
            role = %endpoint.role,
            name = %endpoint.display_name,
            resumed,
            "Endpoint identified"
        );

        let mut outbound = Vec::new();
        match endpoint.role {
            Role::Display => {
                if let Some(host) = self.election.ensure_host(&mut self.registry) {
                    outbound.push(host_update(host));
                }

                if resumed {
                    if let Some(state) = self.store.get() {
                        outbound.push(Outbound::to(
                            id,
                            OutboundEvent::RestoreState,
                            with_fields(
                                state.to_value(),
                                [("timestamp", json!(now)), ("forceRestore", json!(true))],
                            ),
                        ));
                    }
                } else if let Some(peer) = self.catch_up_peer(id) {
                    outbound.push(request_full_state(&peer, id, now));
                }

                outbound.push(Outbound::many(
                    router::controllers(&self.registry),
                    OutboundEvent::TvListUpdate,
                    router::display_list(&self.registry),
                ));
            }
            Role::Controller => {
                outbound.push(Outbound::to(
                    id,
                    OutboundEvent::TvListUpdate,
                    router::display_list(&self.registry),
                ));
                outbound.push(Outbound::to(
                    id,
                    OutboundEvent::SyncStatus,
                    json!({ "enabled": self.sync_enabled }),
                ));
                if let Some(state) = self.store.get() {
                    outbound.push(Outbound::to(id, OutboundEvent::CurrentState, state.to_value()));
                }
            }
        }
        outbound
    }

    /// Move a pending record to the connection that just identified
    fn resume(&mut self, previous: &ConnectionId, id: &ConnectionId) -> bool {
        let pending = self
            .registry
            .find(previous)
            .map_or(false, |e| e.presence == Presence::PendingRemoval);
        if !pending || !self.registry.rekey(previous, id) {
            return false;
        }

        self.reconnection.cancel_grace(previous);
        self.election.rekey(previous, id);
        self.store.rekey(previous, id);
        info!(previous = %previous, connection = %id, "Resumed endpoint on new connection");
        true
    }

    /// The host, or else the first other connected display
    fn catch_up_peer(&self, id: &ConnectionId) -> Option<ConnectionId> {
        let host = self
            .election
            .current()
            .filter(|host| *host != id)
            .filter(|host| self.registry.find(host).map_or(false, |e| e.is_connected()))
            .cloned();
        host.or_else(|| router::other_displays(&self.registry, id).into_iter().next())
    }

    fn heartbeat(
        &mut self,
        id: &ConnectionId,
        state: Option<EndpointState>,
        now: u64,
    ) -> Vec<Outbound> {
        let mut partial = state.unwrap_or_default();
        partial.timestamp = Some(now);
        partial.last_heartbeat = Some(now);
        self.registry.update_state(id, partial);

        vec![Outbound::to(id, OutboundEvent::Pong, json!({ "timestamp": now }))]
    }

    fn buffer_state(&mut self, id: &ConnectionId, report: BufferReport, now: u64) -> Vec<Outbound> {
        let Some(endpoint) = self.registry.find(id) else {
            debug!(connection = %id, "Buffer report from unidentified connection");
            return Vec::new();
        };
        let is_display = endpoint.is_display();

        self.registry.update_state(
            id,
            EndpointState {
                is_buffering: report.is_buffering,
                buffer_level: report.buffer_level,
                timestamp: Some(now),
                last_buffer_update: Some(now),
                ..Default::default()
            },
        );

        let mut outbound = Vec::new();
        if is_display && self.gate.is_low(report.buffer_level) {
            match self.gate.replenishment_peer(&self.registry, id) {
                Some(peer) => {
                    debug!(connection = %id, peer = %peer, "Requesting catch-up snapshot for starving display");
                    outbound.push(request_full_state(&peer, id, now));
                }
                None => debug!(connection = %id, "No well-buffered peer available"),
            }
        }

        outbound.push(Outbound::many(
            router::controllers(&self.registry),
            OutboundEvent::BufferUpdate,
            with_fields(
                Value::Object(report.payload),
                [("tvId", json!(id)), ("timestamp", json!(now))],
            ),
        ));
        outbound
    }

    fn toggle_sync(&mut self, enabled: bool) -> Vec<Outbound> {
        if self.sync_enabled != enabled {
            info!(enabled, "Sync mode changed");
        }
        self.sync_enabled = enabled;
        vec![Outbound::many(
            router::controllers(&self.registry),
            OutboundEvent::SyncStatus,
            json!({ "enabled": enabled }),
        )]
    }

    fn command(&mut self, id: &ConnectionId, command: Command, now: u64) -> Vec<Outbound> {
        let targets = router::command_targets(&self.registry, &command.targeting);

        if let Err(rejection) = self.gate.admit(&self.registry, &command, &targets) {
            return vec![Outbound::to(
                id,
                OutboundEvent::Error,
                json!({
                    "message": rejection.message(),
                    "timestamp": now,
                    "tvId": rejection.display,
                }),
            )];
        }

        let synchronized = self.sync_enabled || command.forces_sync();
        debug!(
            connection = %id,
            action = %command.action,
            targets = targets.len(),
            synchronized,
            "Forwarding command"
        );

        let forwarded = with_fields(
            Value::Object(command.payload.clone()),
            [
                ("tvIds", json!(targets)),
                ("timestamp", json!(now)),
                ("synchronized", json!(synchronized)),
            ],
        );

        let patch = command.playback_patch();
        let snapshot = if patch.is_empty() {
            self.store.snapshot()
        } else {
            self.store
                .apply_update(None, patch, Compensation::None, now)
                .accepted()
                .or_else(|| self.store.snapshot())
        };
        let echo = with_fields(
            snapshot.map(|s| s.to_value()).unwrap_or_else(|| json!({})),
            [("tvIds", json!(targets))],
        );

        vec![
            Outbound::many(targets, OutboundEvent::Command, forwarded),
            Outbound::many(
                router::other_controllers(&self.registry, id),
                OutboundEvent::CurrentState,
                echo,
            ),
        ]
    }

    fn sync_state(&mut self, id: &ConnectionId, patch: PlaybackPatch, now: u64) -> Vec<Outbound> {
        let origin = self.registry.is_display(id).then(|| id.clone());
        let compensation = patch
            .timestamp
            .map_or(Compensation::None, Compensation::Producer);

        match self.store.apply_update(origin.as_ref(), patch, compensation, now) {
            UpdateOutcome::Accepted(state) => {
                let payload = state.to_value();
                vec![
                    Outbound::many(
                        router::other_displays(&self.registry, id),
                        OutboundEvent::SyncState,
                        payload.clone(),
                    ),
                    Outbound::many(
                        router::controllers(&self.registry),
                        OutboundEvent::CurrentState,
                        payload,
                    ),
                ]
            }
            UpdateOutcome::Stale { .. } => Vec::new(),
        }
    }

    fn master_sync(&mut self, id: &ConnectionId, patch: PlaybackPatch, now: u64) -> Vec<Outbound> {
        if !self.election.is_host(id) {
            debug!(connection = %id, "Ignoring masterSync from non-host");
            return Vec::new();
        }

        let producer = patch.master_timestamp.or(patch.timestamp).unwrap_or(now);
        match self
            .store
            .apply_update(Some(id), patch, Compensation::Master(producer), now)
        {
            UpdateOutcome::Accepted(state) => vec![Outbound::many(
                router::other_displays(&self.registry, id),
                OutboundEvent::SlaveSyncUpdate,
                state.to_value(),
            )],
            UpdateOutcome::Stale { .. } => Vec::new(),
        }
    }

    fn request_tv_state(&self, id: &ConnectionId, tv_id: &ConnectionId, now: u64) -> Vec<Outbound> {
        if !self.registry.is_display(tv_id) {
            debug!(connection = %id, target = %tv_id, "State requested for unknown display");
            return Vec::new();
        }
        vec![Outbound::to(
            tv_id,
            OutboundEvent::GetState,
            json!({ "requestedBy": id, "timestamp": now }),
        )]
    }

    fn playlist_update(&mut self, update: RoutedUpdate, now: u64) -> Vec<Outbound> {
        let targets = router::update_targets(&self.registry, &update.targeting);

        let parsed = PlaybackPatch::from_payload(&update.payload).unwrap_or_default();
        let patch = PlaybackPatch {
            playlist: parsed.playlist,
            current_index: parsed.current_index,
            current_song: parsed.current_song,
            ..Default::default()
        };
        if !patch.is_empty() {
            self.store.apply_update(None, patch, Compensation::None, now);
        }

        let payload = with_fields(
            Value::Object(update.payload),
            [("tvIds", json!(targets))],
        );
        vec![
            Outbound::many(targets, OutboundEvent::PlaylistUpdate, payload.clone()),
            Outbound::many(
                router::controllers(&self.registry),
                OutboundEvent::PlaylistUpdate,
                payload,
            ),
        ]
    }

    fn seek(&self, update: RoutedUpdate, now: u64) -> Vec<Outbound> {
        let targets = router::update_targets(&self.registry, &update.targeting);
        let payload = with_fields(
            Value::Object(update.payload),
            [("tvIds", json!(targets)), ("timestamp", json!(now))],
        );
        vec![Outbound::many(targets, OutboundEvent::Seek, payload)]
    }

    fn tv_state_update(
        &mut self,
        id: &ConnectionId,
        report: EndpointState,
        now: u64,
    ) -> Vec<Outbound> {
        if !self.registry.is_display(id) {
            debug!(connection = %id, "State report from non-display");
            return Vec::new();
        }

        let reported_at = report.timestamp.unwrap_or(now);
        let mut partial = report.clone();
        partial.timestamp = Some(reported_at);
        partial.last_state_update = Some(now);
        self.registry.update_state(id, partial);

        if report.is_playing.is_none() {
            debug!(connection = %id, "State report without isPlaying; recorded only");
            return Vec::new();
        }

        let is_host = self.election.is_host(id);
        if is_host {
            self.store.apply_update(
                Some(id),
                PlaybackPatch::from(report.clone()),
                Compensation::None,
                now,
            );
        }

        let payload = with_fields(
            report.to_value(),
            [
                ("tvId", json!(id)),
                ("isHost", json!(is_host)),
                ("stateSequence", json!(self.store.sequence())),
                ("timestamp", json!(reported_at)),
            ],
        );
        vec![Outbound::many(
            router::controllers(&self.registry),
            OutboundEvent::CurrentState,
            payload,
        )]
    }

    fn full_state_update(&mut self, id: &ConnectionId, full: FullState, now: u64) -> Vec<Outbound> {
        if !self.registry.is_display(id) {
            debug!(connection = %id, "Full state from non-display");
            return Vec::new();
        }

        let mut state = full.state;
        state.timestamp = state.timestamp.or(Some(now));
        state.last_state_update = Some(now);
        self.registry.replace_state(id, state);

        let payload = with_fields(Value::Object(full.payload), [("tvId", json!(id))]);
        let mut outbound = vec![Outbound::many(
            router::controllers(&self.registry),
            OutboundEvent::TvStateUpdate,
            payload.clone(),
        )];

        if let Some(target) = full
            .target_tv_id
            .filter(|target| target != id && self.registry.is_display(target))
        {
            debug!(connection = %id, target = %target, "Relaying catch-up snapshot");
            outbound.push(Outbound::to(&target, OutboundEvent::FullStateUpdate, payload));
        }
        outbound
    }

    fn endpoint_error(&mut self, id: &ConnectionId, detail: Value, now: u64) -> Vec<Outbound> {
        let Some(endpoint) = self.registry.find(id) else {
            debug!(connection = %id, "Error reported by unidentified connection");
            return Vec::new();
        };
        let is_display = endpoint.is_display();
        warn!(connection = %id, error = %detail, "Endpoint reported an error");

        self.registry.update_state(
            id,
            EndpointState {
                last_error: Some(detail),
                last_error_timestamp: Some(now),
                ..Default::default()
            },
        );

        let mut outbound = vec![Outbound::to(
            id,
            OutboundEvent::Error,
            json!({ "message": "An error occurred", "timestamp": now, "reconnect": true }),
        )];
        if is_display {
            if let Some(state) = self.store.get() {
                outbound.push(Outbound::to(
                    id,
                    OutboundEvent::SyncState,
                    with_fields(
                        state.to_value(),
                        [("timestamp", json!(now)), ("forceSync", json!(true))],
                    ),
                ));
            }
        }
        outbound
    }

    /// Remove an endpoint for good
    ///
    /// A departing display clears the canonical state it produced, triggers
    /// an election if it was host, and is announced to controllers.
    pub fn evict(&mut self, id: &ConnectionId, cause: &str, now: u64) -> Vec<Outbound> {
        self.reconnection.cancel_grace(id);
        let Some(endpoint) = self.registry.remove(id) else {
            return Vec::new();
        };
        info!(connection = %id, role = %endpoint.role, cause, "Evicted endpoint");

        if !endpoint.is_display() {
            return Vec::new();
        }

        let mut outbound = Vec::new();
        if self.store.originated_from(id) {
            self.store.clear();
        }
        if let Some(host) = self.election.ensure_host(&mut self.registry) {
            outbound.push(host_update(host));
        }

        let controllers = router::controllers(&self.registry);
        outbound.push(Outbound::many(
            controllers.clone(),
            OutboundEvent::TvDisconnected,
            json!({ "tvId": id, "state": endpoint.last_state, "timestamp": now }),
        ));
        outbound.push(Outbound::many(
            controllers,
            OutboundEvent::TvListUpdate,
            router::display_list(&self.registry),
        ));
        outbound
    }
}

fn host_update(host: Option<ConnectionId>) -> Outbound {
    Outbound::everyone(OutboundEvent::HostUpdate, json!({ "hostId": host }))
}

fn request_full_state(peer: &ConnectionId, target: &ConnectionId, now: u64) -> Outbound {
    Outbound::to(
        peer,
        OutboundEvent::RequestFullState,
        json!({ "targetTvId": target, "timestamp": now }),
    )
}
