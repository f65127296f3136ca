//! Registered endpoints and their last known state

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{merge_field, millis, ConnectionId, Role};

/// Whether an endpoint's connection is currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Presence {
    /// Connection is open
    Connected,
    /// Connection dropped transiently; the record survives until its grace
    /// period expires or the endpoint identifies again
    PendingRemoval,
}

/// Last state reported by an endpoint
///
/// Every field is optional. Merging overwrites only the fields present in
/// the incoming value, and unknown fields are carried in `extra` so
/// client-specific data reaches controllers untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_song: Option<Value>,
    #[serde(default, deserialize_with = "millis::deserialize", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_buffering: Option<bool>,
    #[serde(default, deserialize_with = "millis::deserialize", skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<u64>,
    #[serde(default, deserialize_with = "millis::deserialize", skip_serializing_if = "Option::is_none")]
    pub last_state_update: Option<u64>,
    #[serde(default, deserialize_with = "millis::deserialize", skip_serializing_if = "Option::is_none")]
    pub last_state_received: Option<u64>,
    #[serde(default, deserialize_with = "millis::deserialize", skip_serializing_if = "Option::is_none")]
    pub last_buffer_update: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Value>,
    #[serde(default, deserialize_with = "millis::deserialize", skip_serializing_if = "Option::is_none")]
    pub last_error_timestamp: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EndpointState {
    /// Field-wise merge; absent fields in `other` leave `self` untouched
    pub fn merge(&mut self, other: EndpointState) {
        merge_field(&mut self.current_time, other.current_time);
        merge_field(&mut self.duration, other.duration);
        merge_field(&mut self.is_playing, other.is_playing);
        merge_field(&mut self.playlist, other.playlist);
        merge_field(&mut self.current_song, other.current_song);
        merge_field(&mut self.timestamp, other.timestamp);
        merge_field(&mut self.buffer_level, other.buffer_level);
        merge_field(&mut self.is_buffering, other.is_buffering);
        merge_field(&mut self.last_heartbeat, other.last_heartbeat);
        merge_field(&mut self.last_state_update, other.last_state_update);
        merge_field(&mut self.last_state_received, other.last_state_received);
        merge_field(&mut self.last_buffer_update, other.last_buffer_update);
        merge_field(&mut self.last_error, other.last_error);
        merge_field(&mut self.last_error_timestamp, other.last_error_timestamp);
        self.extra.extend(other.extra);
    }

    /// Whether the endpoint reports an underrun below `threshold`
    pub fn is_starving(&self, threshold: f64) -> bool {
        self.is_buffering == Some(true) && self.buffer_level.map_or(false, |l| l < threshold)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A registered controller or display
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub id: ConnectionId,
    pub role: Role,
    pub display_name: String,
    /// Only ever true for displays
    pub is_host: bool,
    pub last_state: EndpointState,
    /// Monotonic registration order, used for host tie-breaks and listings
    pub registered_seq: u64,
    /// Wall-clock registration time in milliseconds
    pub registered_at: u64,
    pub presence: Presence,
}

impl Endpoint {
    pub fn is_display(&self) -> bool {
        self.role.is_display()
    }

    pub fn is_connected(&self) -> bool {
        self.presence == Presence::Connected
    }
}

/// Generate a placeholder name such as `TV-3f9a1c`
pub fn placeholder_name(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..6])
}
