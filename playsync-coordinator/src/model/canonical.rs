//! Canonical playback state and the patches merged into it

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{merge_field, millis, ConnectionId, EndpointState};

/// Keys the coordinator derives itself and never accepts from a client
const DERIVED_KEYS: &[&str] = &["networkLatency", "adjustedTime", "tvId", "lastUpdate"];

/// Typed [`CanonicalState`] fields; a copy left in `extra` would shadow them
/// when serialized
const TYPED_KEYS: &[&str] = &[
    "playlist",
    "currentIndex",
    "currentSong",
    "isPlaying",
    "currentTime",
    "duration",
    "timestamp",
    "masterTimestamp",
    "stateSequence",
    "bufferLevel",
    "isBuffering",
];

/// Routing metadata that travels next to playback fields in commands
const ROUTING_KEYS: &[&str] = &[
    "action",
    "tvIds",
    "targetIds",
    "targetTvId",
    "forceSync",
    "isSyncMode",
    "synchronized",
    "state",
];

/// The single authoritative playback state shared by every display
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalState {
    pub playlist: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_song: Option<Value>,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    /// Coordinator receipt time of the last accepted update
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_latency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_time: Option<f64>,
    pub state_sequence: u64,
    /// Display whose report produced this state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tv_id: Option<ConnectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_buffering: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CanonicalState {
    /// Merge the playback fields of `patch`
    ///
    /// Sequence, timestamps and latency figures are owned by the store and
    /// are not touched here.
    pub fn apply(&mut self, patch: PlaybackPatch) {
        if let Some(playlist) = patch.playlist {
            self.playlist = playlist;
        }
        merge_field(&mut self.current_index, patch.current_index);
        merge_field(&mut self.current_song, patch.current_song);
        if let Some(is_playing) = patch.is_playing {
            self.is_playing = is_playing;
        }
        if let Some(current_time) = patch.current_time {
            self.current_time = current_time;
        }
        if let Some(duration) = patch.duration {
            self.duration = duration;
        }
        merge_field(&mut self.buffer_level, patch.buffer_level);
        merge_field(&mut self.is_buffering, patch.is_buffering);
        self.extra.extend(patch.extra);
    }

    /// Compare playback content, ignoring receipt stamps and derived figures
    pub fn same_content(&self, other: &CanonicalState) -> bool {
        self.content() == other.content()
    }

    fn content(&self) -> CanonicalState {
        CanonicalState {
            timestamp: 0,
            master_timestamp: None,
            network_latency: None,
            adjusted_time: None,
            state_sequence: 0,
            last_update: None,
            ..self.clone()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// A partial playback update decoded from an inbound payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackPatch {
    #[serde(default)]
    pub playlist: Option<Vec<Value>>,
    #[serde(default)]
    pub current_index: Option<i64>,
    #[serde(default)]
    pub current_song: Option<Value>,
    #[serde(default)]
    pub is_playing: Option<bool>,
    #[serde(default)]
    pub current_time: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    /// Producer sample time
    #[serde(default, deserialize_with = "millis::deserialize")]
    pub timestamp: Option<u64>,
    /// Producer sample time on the master channel
    #[serde(default, deserialize_with = "millis::deserialize")]
    pub master_timestamp: Option<u64>,
    #[serde(default)]
    pub state_sequence: Option<u64>,
    #[serde(default)]
    pub buffer_level: Option<f64>,
    #[serde(default)]
    pub is_buffering: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlaybackPatch {
    /// Decode a patch from a payload object, dropping routing and derived keys
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let patch: PlaybackPatch = serde_json::from_value(Value::Object(payload.clone()))?;
        Ok(patch.normalized())
    }

    fn normalized(mut self) -> Self {
        for key in DERIVED_KEYS.iter().chain(ROUTING_KEYS).chain(TYPED_KEYS) {
            self.extra.remove(*key);
        }
        // Older clients send the playlist position as a bare `currentSong` index
        if self.current_index.is_none() {
            self.current_index = self.current_song.as_ref().and_then(Value::as_i64);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == PlaybackPatch::default()
    }
}

impl From<EndpointState> for PlaybackPatch {
    fn from(state: EndpointState) -> Self {
        PlaybackPatch {
            current_index: state.extra.get("currentIndex").and_then(Value::as_i64),
            playlist: state.playlist,
            current_song: state.current_song,
            is_playing: state.is_playing,
            current_time: state.current_time,
            duration: state.duration,
            timestamp: state.timestamp,
            master_timestamp: None,
            state_sequence: None,
            buffer_level: state.buffer_level,
            is_buffering: state.is_buffering,
            extra: state.extra,
        }
        .normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_patch_strips_derived_and_routing_keys() {
        let patch = PlaybackPatch::from_payload(&object(json!({
            "action": "play",
            "tvIds": ["a"],
            "currentTime": 4.0,
            "adjustedTime": 99.0,
            "networkLatency": 500,
            "tvId": "spoofed",
            "volume": 0.3
        })))
        .unwrap();

        assert_eq!(patch.current_time, Some(4.0));
        assert_eq!(patch.extra.len(), 1);
        assert_eq!(patch.extra.get("volume"), Some(&json!(0.3)));
    }

    #[test]
    fn test_report_cannot_shadow_owned_fields() {
        let report: EndpointState = serde_json::from_value(json!({
            "isPlaying": true,
            "stateSequence": 999,
            "masterTimestamp": 5,
            "currentIndex": "bogus",
            "volume": 0.3
        }))
        .unwrap();

        let mut state = CanonicalState {
            state_sequence: 1,
            ..Default::default()
        };
        state.apply(PlaybackPatch::from(report));

        let value = state.to_value();
        assert_eq!(value["stateSequence"], json!(state.state_sequence));
        assert!(value.get("masterTimestamp").is_none());
        assert!(value.get("currentIndex").is_none());
        assert_eq!(value["volume"], json!(0.3));
    }

    #[test]
    fn test_report_current_index_is_typed() {
        let report: EndpointState =
            serde_json::from_value(json!({ "currentIndex": 2 })).unwrap();
        let patch = PlaybackPatch::from(report);
        assert_eq!(patch.current_index, Some(2));
        assert!(patch.extra.is_empty());
    }

    #[test]
    fn test_numeric_current_song_sets_index() {
        let patch =
            PlaybackPatch::from_payload(&object(json!({ "currentSong": 3 }))).unwrap();
        assert_eq!(patch.current_index, Some(3));
    }

    #[test]
    fn test_apply_merges_present_fields_only() {
        let mut state = CanonicalState {
            is_playing: true,
            current_time: 10.0,
            duration: 200.0,
            ..Default::default()
        };

        state.apply(PlaybackPatch {
            current_time: Some(12.0),
            ..Default::default()
        });

        assert!(state.is_playing);
        assert_eq!(state.current_time, 12.0);
        assert_eq!(state.duration, 200.0);
    }

    #[test]
    fn test_same_content_ignores_stamps() {
        let a = CanonicalState {
            current_time: 1.0,
            timestamp: 10,
            last_update: Some(10),
            state_sequence: 1,
            ..Default::default()
        };
        let b = CanonicalState {
            timestamp: 20,
            last_update: Some(20),
            state_sequence: 2,
            ..a.clone()
        };
        let c = CanonicalState {
            current_time: 2.0,
            ..a.clone()
        };

        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
    }

    #[test]
    fn test_serializes_camel_case() {
        let state = CanonicalState {
            is_playing: true,
            tv_id: Some(ConnectionId::new("d1")),
            ..Default::default()
        };
        let value = state.to_value();
        assert_eq!(value["isPlaying"], json!(true));
        assert_eq!(value["tvId"], json!("d1"));
        assert!(value.get("adjustedTime").is_none());
    }
}
