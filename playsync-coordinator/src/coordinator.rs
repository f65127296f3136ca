//! The synchronization coordinator
//!
//! [`SyncCoordinator`] is the single owner of session state. Transport
//! callbacks (`handle_connect`, `handle_disconnect`, `handle_message`) take
//! one lock, compute the outbound messages, release the lock and then hand
//! the messages to the [`Transport`]. Grace timers, heartbeats and the
//! inactivity sweep are tokio tasks that go through the same lock.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::gate::BufferingGate;
use crate::model::{CanonicalState, ConnectionId, Endpoint, Presence, Role};
use crate::protocol::{ClientMessage, OutboundEvent};
use crate::reconnect::DisconnectReason;
use crate::router::{self, Outbound};
use crate::session::Session;
use crate::transport::Transport;

/// Coordinates playback across displays and controllers
///
/// # Example
///
/// ```rust,ignore
/// let transport = Arc::new(RecordingTransport::new());
/// let coordinator = SyncCoordinator::new(CoordinatorConfig::default(), transport)?;
///
/// coordinator.handle_connect(&id);
/// coordinator.handle_message(&id, "identify", json!({ "type": "tv" }))?;
/// ```
pub struct SyncCoordinator {
    config: CoordinatorConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    session: Mutex<Session>,
    me: Weak<SyncCoordinator>,
}

impl SyncCoordinator {
    /// Create a coordinator using the system clock
    pub fn new(config: CoordinatorConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Create a coordinator with a custom wall clock
    ///
    /// # Arguments
    /// * `config` - Validated before use
    /// * `transport` - Receives every outbound message
    /// * `clock` - Source of wire timestamps
    pub fn with_clock(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let gate = BufferingGate::new(config.low_buffer_threshold, config.healthy_buffer_threshold);
        let session = Session::new(&config.display_name_prefix, gate);

        Ok(Arc::new_cyclic(|me| Self {
            config,
            transport,
            clock,
            session: Mutex::new(session),
            me: me.clone(),
        }))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// A connection was opened
    ///
    /// Starts liveness tracking and, when enabled, the connection's
    /// heartbeat task. Must be called from within a tokio runtime.
    pub fn handle_connect(&self, id: &ConnectionId) {
        let mut session = self.session.lock();
        session.reconnection.track(id.clone(), Instant::now());
        if self.config.enable_heartbeat {
            let handle = self.spawn_heartbeat(id.clone());
            session.reconnection.set_heartbeat(id, handle.abort_handle());
        }
        debug!(connection = %id, "Connection opened");
    }

    /// A connection was closed
    ///
    /// Transient reasons keep the endpoint through the grace period; any
    /// other reason evicts it at once.
    pub fn handle_disconnect(&self, id: &ConnectionId, reason: &str) {
        let reason = DisconnectReason::parse(reason);
        let now = self.clock.now_millis();

        let outbound = {
            let mut session = self.session.lock();
            session.reconnection.untrack(id);

            match session.registry.find(id).map(|e| e.presence) {
                None => {
                    debug!(connection = %id, reason = %reason, "Unidentified connection closed");
                    Vec::new()
                }
                Some(Presence::PendingRemoval) => Vec::new(),
                Some(Presence::Connected)
                    if reason.is_transient() && !self.config.grace_period.is_zero() =>
                {
                    session.registry.mark_pending(id);
                    self.start_grace(&mut session, id);
                    info!(
                        connection = %id,
                        reason = %reason,
                        grace_secs = self.config.grace_period.as_secs(),
                        "Endpoint disconnected; holding record for grace period"
                    );
                    Vec::new()
                }
                Some(Presence::Connected) => session.evict(id, reason.as_str(), now),
            }
        };

        router::dispatch(self.transport.as_ref(), outbound);
    }

    /// An event arrived on a connection
    ///
    /// Any inbound traffic counts as liveness. Payloads that cannot be
    /// decoded are dropped and reported as errors; nothing is sent.
    pub fn handle_message(&self, id: &ConnectionId, event: &str, data: Value) -> Result<()> {
        self.session.lock().reconnection.touch(id, Instant::now());

        let message = ClientMessage::decode(event, data).map_err(|e| {
            warn!(connection = %id, event, error = %e, "Dropping undecodable message");
            e
        })?;

        let now = self.clock.now_millis();
        let outbound = {
            let mut session = self.session.lock();
            session.handle(id, message, now)
        };

        router::dispatch(self.transport.as_ref(), outbound);
        Ok(())
    }

    /// Current canonical playback state
    pub fn snapshot(&self) -> Option<CanonicalState> {
        self.session.lock().store.snapshot()
    }

    pub fn host(&self) -> Option<ConnectionId> {
        self.session.lock().election.current().cloned()
    }

    pub fn endpoint(&self, id: &ConnectionId) -> Option<Endpoint> {
        self.session.lock().registry.find(id).cloned()
    }

    /// Registered endpoints of `role` in registration order
    pub fn endpoints(&self, role: Role) -> Vec<Endpoint> {
        self.session
            .lock()
            .registry
            .list_by_role(role)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn sync_enabled(&self) -> bool {
        self.session.lock().sync_enabled
    }

    /// Whether `id` is waiting out a grace period
    pub fn is_pending(&self, id: &ConnectionId) -> bool {
        self.session.lock().reconnection.has_grace(id)
    }

    /// Spawn the periodic inactivity sweep
    ///
    /// The task stops on [`shutdown`](Self::shutdown) or when the coordinator
    /// is dropped.
    pub fn spawn_liveness_sweep(&self) -> JoinHandle<()> {
        let me = self.me.clone();
        let period = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(coordinator) = me.upgrade() else {
                    break;
                };
                coordinator.sweep_inactive();
            }
        });

        self.session.lock().reconnection.set_sweep(handle.abort_handle());
        handle
    }

    /// Disconnect every connection silent for longer than the inactivity
    /// timeout; returns the ids that were dropped
    pub fn sweep_inactive(&self) -> Vec<ConnectionId> {
        let stale = self
            .session
            .lock()
            .reconnection
            .inactive(Instant::now(), self.config.inactive_timeout);

        for id in &stale {
            warn!(connection = %id, "Connection inactive; disconnecting");
            self.drop_connection(id, DisconnectReason::HeartbeatTimeout);
        }
        stale
    }

    /// Abort every timer and background task
    pub fn shutdown(&self) {
        self.session.lock().reconnection.shutdown();
        info!("Coordinator timers stopped");
    }

    fn start_grace(&self, session: &mut Session, id: &ConnectionId) {
        let token = session.reconnection.next_grace_token();
        let me = self.me.clone();
        let grace = self.config.grace_period;
        let task_id = id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(coordinator) = me.upgrade() {
                coordinator.expire_grace(&task_id, token);
            }
        });
        session
            .reconnection
            .insert_grace(id.clone(), token, handle.abort_handle());
    }

    fn expire_grace(&self, id: &ConnectionId, token: u64) {
        let now = self.clock.now_millis();
        let outbound = {
            let mut session = self.session.lock();
            if !session.reconnection.finish_grace(id, token) {
                return;
            }
            let pending = session
                .registry
                .find(id)
                .map_or(false, |e| e.presence == Presence::PendingRemoval);
            if !pending {
                return;
            }
            info!(connection = %id, "Grace period expired");
            session.evict(id, "grace period expired", now)
        };

        router::dispatch(self.transport.as_ref(), outbound);
    }

    fn spawn_heartbeat(&self, id: ConnectionId) -> JoinHandle<()> {
        let me = self.me.clone();
        let period = self.config.heartbeat_interval;
        let timeout = self.config.heartbeat_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sent_at = Instant::now();
                match me.upgrade() {
                    Some(coordinator) if coordinator.send_ping(&id) => {}
                    _ => break,
                }

                tokio::time::sleep(timeout).await;
                match me.upgrade() {
                    Some(coordinator) if coordinator.ping_acknowledged(&id, sent_at) => {}
                    _ => break,
                }
            }
        })
    }

    /// Ping a connection unless it has already gone quiet for too long
    fn send_ping(&self, id: &ConnectionId) -> bool {
        let last_seen = self.session.lock().reconnection.last_seen(id);
        let Some(last_seen) = last_seen else {
            return false;
        };

        if Instant::now().saturating_duration_since(last_seen) > self.config.inactive_timeout {
            warn!(connection = %id, "Connection inactive; disconnecting");
            self.drop_connection(id, DisconnectReason::HeartbeatTimeout);
            return false;
        }

        let now = self.clock.now_millis();
        router::dispatch(
            self.transport.as_ref(),
            vec![Outbound::to(id, OutboundEvent::Ping, json!({ "timestamp": now }))],
        );
        true
    }

    fn ping_acknowledged(&self, id: &ConnectionId, sent_at: Instant) -> bool {
        let last_seen = self.session.lock().reconnection.last_seen(id);
        match last_seen {
            Some(seen) if seen >= sent_at => true,
            Some(_) => {
                warn!(
                    connection = %id,
                    timeout_secs = self.config.heartbeat_timeout.as_secs(),
                    "Heartbeat timed out; disconnecting"
                );
                self.drop_connection(id, DisconnectReason::HeartbeatTimeout);
                false
            }
            None => false,
        }
    }

    /// Close a connection from our side and evict its endpoint immediately
    fn drop_connection(&self, id: &ConnectionId, reason: DisconnectReason) {
        let now = self.clock.now_millis();
        let outbound = {
            let mut session = self.session.lock();
            session.reconnection.untrack(id);
            session.evict(id, reason.as_str(), now)
        };

        self.transport.disconnect(id);
        router::dispatch(self.transport.as_ref(), outbound);
    }
}
