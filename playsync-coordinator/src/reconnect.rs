//! Reconnection bookkeeping
//!
//! Classifies disconnect reasons and owns the cancelable timers keyed by
//! connection id: one grace timer per transiently disconnected endpoint and
//! one heartbeat task per open connection. The tasks themselves are spawned
//! by the coordinator; this module tracks and cancels them.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::model::ConnectionId;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The socket dropped without a close handshake
    TransportClose,
    /// The transport's own keepalive gave up
    PingTimeout,
    /// The client closed the connection deliberately
    ClientDisconnect,
    /// The server closed the connection
    ServerDisconnect,
    /// The application heartbeat went unanswered
    HeartbeatTimeout,
    Other(String),
}

impl DisconnectReason {
    /// Parse a transport-reported reason string
    pub fn parse(reason: &str) -> Self {
        match reason.trim() {
            "transport close" | "transport error" => DisconnectReason::TransportClose,
            "ping timeout" => DisconnectReason::PingTimeout,
            "client namespace disconnect" => DisconnectReason::ClientDisconnect,
            "server namespace disconnect" | "server shutting down" => {
                DisconnectReason::ServerDisconnect
            }
            "heartbeat timeout" => DisconnectReason::HeartbeatTimeout,
            other => DisconnectReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::ClientDisconnect => "client namespace disconnect",
            DisconnectReason::ServerDisconnect => "server namespace disconnect",
            DisconnectReason::HeartbeatTimeout => "heartbeat timeout",
            DisconnectReason::Other(reason) => reason,
        }
    }

    /// Transient drops keep the endpoint's record through a grace period
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DisconnectReason::TransportClose | DisconnectReason::PingTimeout
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct GraceTimer {
    token: u64,
    handle: AbortHandle,
}

#[derive(Debug)]
struct Liveness {
    last_seen: Instant,
    heartbeat: Option<AbortHandle>,
}

/// Grace timers and per-connection liveness
#[derive(Debug, Default)]
pub struct ReconnectionManager {
    grace: HashMap<ConnectionId, GraceTimer>,
    liveness: HashMap<ConnectionId, Liveness>,
    sweep: Option<AbortHandle>,
    next_token: u64,
}

impl ReconnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking liveness of a freshly opened connection
    pub fn track(&mut self, id: ConnectionId, now: Instant) {
        if let Some(previous) = self.liveness.insert(
            id,
            Liveness {
                last_seen: now,
                heartbeat: None,
            },
        ) {
            if let Some(handle) = previous.heartbeat {
                handle.abort();
            }
        }
    }

    pub fn set_heartbeat(&mut self, id: &ConnectionId, handle: AbortHandle) {
        match self.liveness.get_mut(id) {
            Some(liveness) => {
                if let Some(old) = liveness.heartbeat.replace(handle) {
                    old.abort();
                }
            }
            None => handle.abort(),
        }
    }

    /// Record inbound traffic on a connection
    pub fn touch(&mut self, id: &ConnectionId, now: Instant) {
        if let Some(liveness) = self.liveness.get_mut(id) {
            liveness.last_seen = now;
        }
    }

    pub fn last_seen(&self, id: &ConnectionId) -> Option<Instant> {
        self.liveness.get(id).map(|l| l.last_seen)
    }

    pub fn is_tracked(&self, id: &ConnectionId) -> bool {
        self.liveness.contains_key(id)
    }

    /// Stop tracking a connection and abort its heartbeat task
    pub fn untrack(&mut self, id: &ConnectionId) {
        if let Some(liveness) = self.liveness.remove(id) {
            if let Some(handle) = liveness.heartbeat {
                handle.abort();
            }
        }
    }

    /// Connections silent for longer than `timeout`
    pub fn inactive(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .liveness
            .iter()
            .filter(|(_, l)| now.saturating_duration_since(l.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Reserve a token for a grace timer about to be spawned
    pub fn next_grace_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    pub fn insert_grace(&mut self, id: ConnectionId, token: u64, handle: AbortHandle) {
        if let Some(previous) = self.grace.insert(id, GraceTimer { token, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel a pending grace timer; returns whether one existed
    pub fn cancel_grace(&mut self, id: &ConnectionId) -> bool {
        match self.grace.remove(id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Claim an expired grace timer
    ///
    /// Returns false when the timer was canceled or superseded after it
    /// fired, in which case the expiry must be ignored.
    pub fn finish_grace(&mut self, id: &ConnectionId, token: u64) -> bool {
        match self.grace.get(id) {
            Some(timer) if timer.token == token => {
                self.grace.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn has_grace(&self, id: &ConnectionId) -> bool {
        self.grace.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.grace.len()
    }

    pub fn set_sweep(&mut self, handle: AbortHandle) {
        if let Some(old) = self.sweep.replace(handle) {
            old.abort();
        }
    }

    /// Abort every timer and task
    pub fn shutdown(&mut self) {
        for (_, timer) in self.grace.drain() {
            timer.handle.abort();
        }
        for (_, liveness) in self.liveness.drain() {
            if let Some(handle) = liveness.heartbeat {
                handle.abort();
            }
        }
        if let Some(sweep) = self.sweep.take() {
            sweep.abort();
        }
    }
}

impl Drop for ReconnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
