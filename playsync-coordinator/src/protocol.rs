//! Wire protocol
//!
//! Inbound events are decoded into [`ClientMessage`] from an event name and a
//! JSON payload. Missing optional fields default; a payload that cannot be
//! decoded at all yields a [`ProtocolError`] and the message is dropped.
//! Outbound traffic is an [`OutboundEvent`] plus a JSON payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ProtocolError;
use crate::model::{millis, ConnectionId, Endpoint, EndpointState, PlaybackPatch, Role};

/// `{"event": "...", "data": ...}` frame used by the WebSocket layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse a text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))?;
        if envelope.event.trim().is_empty() {
            return Err(ProtocolError::InvalidEnvelope(
                "event name is empty".to_string(),
            ));
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&OutboundMessage> for Envelope {
    fn from(message: &OutboundMessage) -> Self {
        Envelope::new(message.event.as_str(), message.payload.clone())
    }
}

/// Which displays a routed event is aimed at
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Targeting {
    /// Explicit target list
    #[serde(default, alias = "targetIds")]
    pub tv_ids: Option<Vec<ConnectionId>>,
    /// Single target, honored when not in sync mode
    #[serde(default)]
    pub tv_id: Option<ConnectionId>,
    #[serde(default)]
    pub is_sync_mode: Option<bool>,
}

/// `identify` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    #[serde(rename = "type", alias = "role")]
    pub role: Role,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<EndpointState>,
    /// Connection id this endpoint had before reconnecting
    #[serde(default)]
    pub previous_id: Option<ConnectionId>,
}

/// `command` payload
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub action: String,
    pub targeting: Targeting,
    pub force_sync: bool,
    /// The payload as received, forwarded to displays
    pub payload: Map<String, Value>,
}

impl Command {
    pub fn is_playback_control(&self) -> bool {
        matches!(self.action.as_str(), "play" | "pause")
    }

    pub fn forces_sync(&self) -> bool {
        self.force_sync || self.action == "forceSync"
    }

    /// Playback fields this command sets on the canonical state
    pub fn playback_patch(&self) -> PlaybackPatch {
        let mut patch = PlaybackPatch::from_payload(&self.payload).unwrap_or_default();
        match self.action.as_str() {
            "play" => patch.is_playing = Some(true),
            "pause" => patch.is_playing = Some(false),
            _ => {}
        }
        patch
    }
}

/// `playlistUpdate` or `seek` payload
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedUpdate {
    pub targeting: Targeting,
    pub payload: Map<String, Value>,
}

/// `bufferState` payload
#[derive(Debug, Clone, PartialEq)]
pub struct BufferReport {
    pub is_buffering: Option<bool>,
    pub buffer_level: Option<f64>,
    pub payload: Map<String, Value>,
}

/// `fullStateUpdate` payload
#[derive(Debug, Clone, PartialEq)]
pub struct FullState {
    pub state: EndpointState,
    /// Starving display this snapshot was requested for
    pub target_tv_id: Option<ConnectionId>,
    pub payload: Map<String, Value>,
}

/// A decoded inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Identify(Identify),
    Heartbeat { state: Option<EndpointState> },
    Pong,
    BufferState(BufferReport),
    ToggleSync { enabled: bool },
    Command(Command),
    SyncState(PlaybackPatch),
    MasterSync(PlaybackPatch),
    RequestTvState { tv_id: ConnectionId },
    PlaylistUpdate(RoutedUpdate),
    Seek(RoutedUpdate),
    StateReceived { timestamp: Option<u64> },
    TvStateUpdate(EndpointState),
    SongCompleted(Value),
    FullStateUpdate(FullState),
    SyncConfirm(Value),
    Error(Value),
}

impl ClientMessage {
    /// Decode an inbound event; `null` data is treated as an empty object
    pub fn decode(event: &str, data: Value) -> Result<Self, ProtocolError> {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let message = match event {
            "identify" => ClientMessage::Identify(parse(event, &data)?),
            "heartbeat" => {
                #[derive(Deserialize)]
                struct Heartbeat {
                    #[serde(default)]
                    state: Option<EndpointState>,
                }
                let heartbeat: Heartbeat = parse(event, &data)?;
                ClientMessage::Heartbeat {
                    state: heartbeat.state,
                }
            }
            "pong" => ClientMessage::Pong,
            "bufferState" => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct Buffer {
                    #[serde(default)]
                    is_buffering: Option<bool>,
                    #[serde(default)]
                    buffer_level: Option<f64>,
                }
                let buffer: Buffer = parse(event, &data)?;
                ClientMessage::BufferState(BufferReport {
                    is_buffering: buffer.is_buffering,
                    buffer_level: buffer.buffer_level,
                    payload: parse(event, &data)?,
                })
            }
            "toggleSync" => {
                let enabled = match &data {
                    Value::Bool(enabled) => *enabled,
                    _ => {
                        #[derive(Deserialize)]
                        struct Toggle {
                            enabled: bool,
                        }
                        parse::<Toggle>(event, &data)?.enabled
                    }
                };
                ClientMessage::ToggleSync { enabled }
            }
            "command" => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct Header {
                    #[serde(default)]
                    action: String,
                    #[serde(default)]
                    force_sync: Option<bool>,
                }
                let header: Header = parse(event, &data)?;
                ClientMessage::Command(Command {
                    action: header.action,
                    targeting: parse(event, &data)?,
                    force_sync: header.force_sync.unwrap_or(false),
                    payload: parse(event, &data)?,
                })
            }
            "syncState" => ClientMessage::SyncState(patch(event, &data)?),
            "masterSync" => ClientMessage::MasterSync(patch(event, &data)?),
            "requestTVState" => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct Request {
                    tv_id: ConnectionId,
                }
                ClientMessage::RequestTvState {
                    tv_id: parse::<Request>(event, &data)?.tv_id,
                }
            }
            "playlistUpdate" => ClientMessage::PlaylistUpdate(routed(event, &data)?),
            "seek" => ClientMessage::Seek(routed(event, &data)?),
            "stateReceived" => {
                #[derive(Deserialize)]
                struct Received {
                    #[serde(default, deserialize_with = "millis::deserialize")]
                    timestamp: Option<u64>,
                }
                ClientMessage::StateReceived {
                    timestamp: parse::<Received>(event, &data)?.timestamp,
                }
            }
            "tvStateUpdate" => ClientMessage::TvStateUpdate(report(event, &data)?),
            "songCompleted" => ClientMessage::SongCompleted(data),
            "fullStateUpdate" => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct Target {
                    #[serde(default)]
                    target_tv_id: Option<ConnectionId>,
                }
                ClientMessage::FullStateUpdate(FullState {
                    state: report(event, &data)?,
                    target_tv_id: parse::<Target>(event, &data)?.target_tv_id,
                    payload: parse(event, &data)?,
                })
            }
            "syncConfirm" => ClientMessage::SyncConfirm(data),
            "error" | "connect_error" => ClientMessage::Error(data),
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };

        Ok(message)
    }

    /// Event name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Identify(_) => "identify",
            ClientMessage::Heartbeat { .. } => "heartbeat",
            ClientMessage::Pong => "pong",
            ClientMessage::BufferState(_) => "bufferState",
            ClientMessage::ToggleSync { .. } => "toggleSync",
            ClientMessage::Command(_) => "command",
            ClientMessage::SyncState(_) => "syncState",
            ClientMessage::MasterSync(_) => "masterSync",
            ClientMessage::RequestTvState { .. } => "requestTVState",
            ClientMessage::PlaylistUpdate(_) => "playlistUpdate",
            ClientMessage::Seek(_) => "seek",
            ClientMessage::StateReceived { .. } => "stateReceived",
            ClientMessage::TvStateUpdate(_) => "tvStateUpdate",
            ClientMessage::SongCompleted(_) => "songCompleted",
            ClientMessage::FullStateUpdate(_) => "fullStateUpdate",
            ClientMessage::SyncConfirm(_) => "syncConfirm",
            ClientMessage::Error(_) => "error",
        }
    }
}

fn parse<T: DeserializeOwned>(event: &str, data: &Value) -> Result<T, ProtocolError> {
    T::deserialize(data).map_err(|source| ProtocolError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

fn patch(event: &str, data: &Value) -> Result<PlaybackPatch, ProtocolError> {
    let payload: Map<String, Value> = parse(event, data)?;
    PlaybackPatch::from_payload(&payload).map_err(|source| ProtocolError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

fn routed(event: &str, data: &Value) -> Result<RoutedUpdate, ProtocolError> {
    Ok(RoutedUpdate {
        targeting: parse(event, data)?,
        payload: parse(event, data)?,
    })
}

/// A display's state report, either nested under `state` or inline
fn report(event: &str, data: &Value) -> Result<EndpointState, ProtocolError> {
    let body = match data.get("state") {
        Some(state @ Value::Object(_)) => state,
        _ => data,
    };
    let mut state: EndpointState = parse(event, body)?;
    for key in ["tvId", "targetTvId"] {
        state.extra.remove(key);
    }
    Ok(state)
}

/// Events the coordinator emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundEvent {
    Command,
    CurrentState,
    SyncState,
    SlaveSyncUpdate,
    PlaylistUpdate,
    Seek,
    BufferUpdate,
    RequestFullState,
    SongCompleted,
    TvStateUpdate,
    FullStateUpdate,
    TvSyncConfirmed,
    SyncStatus,
    HostUpdate,
    TvListUpdate,
    TvDisconnected,
    RestoreState,
    Error,
    Ping,
    Pong,
    GetState,
}

impl OutboundEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundEvent::Command => "command",
            OutboundEvent::CurrentState => "currentState",
            OutboundEvent::SyncState => "syncState",
            OutboundEvent::SlaveSyncUpdate => "slaveSyncUpdate",
            OutboundEvent::PlaylistUpdate => "playlistUpdate",
            OutboundEvent::Seek => "seek",
            OutboundEvent::BufferUpdate => "bufferUpdate",
            OutboundEvent::RequestFullState => "requestFullState",
            OutboundEvent::SongCompleted => "songCompleted",
            OutboundEvent::TvStateUpdate => "tvStateUpdate",
            OutboundEvent::FullStateUpdate => "fullStateUpdate",
            OutboundEvent::TvSyncConfirmed => "tvSyncConfirmed",
            OutboundEvent::SyncStatus => "syncStatus",
            OutboundEvent::HostUpdate => "hostUpdate",
            OutboundEvent::TvListUpdate => "tvListUpdate",
            OutboundEvent::TvDisconnected => "tvDisconnected",
            OutboundEvent::RestoreState => "restoreState",
            OutboundEvent::Error => "error",
            OutboundEvent::Ping => "ping",
            OutboundEvent::Pong => "pong",
            OutboundEvent::GetState => "getState",
        }
    }
}

impl fmt::Display for OutboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event and its payload, ready for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub event: OutboundEvent,
    pub payload: Value,
}

impl OutboundMessage {
    pub fn new(event: OutboundEvent, payload: Value) -> Self {
        Self { event, payload }
    }
}

/// One entry of a `tvListUpdate`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySummary {
    pub id: ConnectionId,
    pub name: String,
    pub state: EndpointState,
    pub is_host: bool,
}

impl From<&Endpoint> for DisplaySummary {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            id: endpoint.id.clone(),
            name: endpoint.display_name.clone(),
            state: endpoint.last_state.clone(),
            is_host: endpoint.is_host,
        }
    }
}

/// Copy `fields` over `base`, which is treated as an empty object if it is
/// not one already
pub fn with_fields<I>(base: Value, fields: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    let mut object = match base {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in fields {
        object.insert(key.to_string(), value);
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_identify() {
        let message = ClientMessage::decode(
            "identify",
            json!({ "type": "tv", "name": "Kitchen", "previousId": "abc" }),
        )
        .unwrap();

        match message {
            ClientMessage::Identify(identify) => {
                assert_eq!(identify.role, Role::Display);
                assert_eq!(identify.name.as_deref(), Some("Kitchen"));
                assert_eq!(identify.previous_id, Some(ConnectionId::new("abc")));
                assert!(identify.state.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_identify_requires_known_role() {
        let err = ClientMessage::decode("identify", json!({ "type": "speaker" })).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn test_decode_command() {
        let message = ClientMessage::decode(
            "command",
            json!({ "action": "play", "targetIds": ["d1", "d1"], "forceSync": true }),
        )
        .unwrap();

        match message {
            ClientMessage::Command(command) => {
                assert!(command.is_playback_control());
                assert!(command.forces_sync());
                assert_eq!(
                    command.targeting.tv_ids,
                    Some(vec![ConnectionId::new("d1"), ConnectionId::new("d1")])
                );
                assert_eq!(command.playback_patch().is_playing, Some(true));
                assert!(command.payload.contains_key("targetIds"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_toggle_sync_accepts_bool_or_object() {
        assert_eq!(
            ClientMessage::decode("toggleSync", json!(true)).unwrap(),
            ClientMessage::ToggleSync { enabled: true }
        );
        assert_eq!(
            ClientMessage::decode("toggleSync", json!({ "enabled": false })).unwrap(),
            ClientMessage::ToggleSync { enabled: false }
        );
        assert!(ClientMessage::decode("toggleSync", json!("yes")).is_err());
    }

    #[test]
    fn test_tv_state_update_nested_or_inline() {
        let nested = ClientMessage::decode(
            "tvStateUpdate",
            json!({ "tvId": "d1", "state": { "isPlaying": true, "currentTime": 3.5 } }),
        )
        .unwrap();
        let inline = ClientMessage::decode(
            "tvStateUpdate",
            json!({ "tvId": "d1", "isPlaying": true, "currentTime": 3.5 }),
        )
        .unwrap();

        assert_eq!(nested, inline);
        match nested {
            ClientMessage::TvStateUpdate(state) => {
                assert_eq!(state.is_playing, Some(true));
                assert!(state.extra.is_empty());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_null_payload_defaults() {
        assert_eq!(
            ClientMessage::decode("heartbeat", Value::Null).unwrap(),
            ClientMessage::Heartbeat { state: None }
        );
        assert_eq!(
            ClientMessage::decode("stateReceived", Value::Null).unwrap(),
            ClientMessage::StateReceived { timestamp: None }
        );
    }

    #[test]
    fn test_unknown_event() {
        let err = ClientMessage::decode("launchRockets", json!({})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(name) if name == "launchRockets"));
    }

    #[test]
    fn test_command_requires_object() {
        assert!(ClientMessage::decode("command", json!([1, 2])).is_err());
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::decode(r#"{"event":"ping","data":{"timestamp":1}}"#).unwrap();
        assert_eq!(envelope.event, "ping");
        assert_eq!(envelope.data["timestamp"], json!(1));

        let missing_data = Envelope::decode(r#"{"event":"pong"}"#).unwrap();
        assert_eq!(missing_data.data, Value::Null);

        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"event":""}"#).is_err());
    }

    #[test]
    fn test_with_fields_overrides() {
        let value = with_fields(json!({ "a": 1, "b": 2 }), [("b", json!(3)), ("c", json!(4))]);
        assert_eq!(value, json!({ "a": 1, "b": 3, "c": 4 }));
        assert_eq!(with_fields(Value::Null, [("x", json!(true))]), json!({ "x": true }));
    }
}
