//! # playsync-coordinator
//!
//! Keeps a group of displays playing in lockstep while one or more
//! controllers drive them.
//!
//! The coordinator owns the registry of connected endpoints, elects one
//! display as host, merges playback reports into a single canonical state
//! (compensating for network latency), gates playback commands on buffer
//! health, and holds records of transiently disconnected endpoints through a
//! grace period so they can resume where they left off.
//!
//! It does not own any sockets. A transport feeds it connection events
//! through [`SyncCoordinator::handle_connect`],
//! [`SyncCoordinator::handle_disconnect`] and
//! [`SyncCoordinator::handle_message`], and receives outbound messages
//! through the [`Transport`] trait.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use playsync_coordinator::{ConnectionId, CoordinatorConfig, RecordingTransport, SyncCoordinator};
//! use serde_json::json;
//!
//! let transport = Arc::new(RecordingTransport::new());
//! let coordinator = SyncCoordinator::new(CoordinatorConfig::default(), transport.clone())?;
//!
//! let tv = ConnectionId::new("tv-1");
//! coordinator.handle_connect(&tv);
//! coordinator.handle_message(&tv, "identify", json!({ "type": "tv", "name": "Lobby" }))?;
//! assert_eq!(coordinator.host(), Some(tv));
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod election;
pub mod error;
pub mod gate;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod store;
pub mod transport;

mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoordinatorConfig;
pub use coordinator::SyncCoordinator;
pub use error::{CoordinatorError, ProtocolError, Result};
pub use model::{CanonicalState, ConnectionId, Endpoint, EndpointState, PlaybackPatch, Presence, Role};
pub use protocol::{ClientMessage, Envelope, OutboundEvent, OutboundMessage};
pub use reconnect::DisconnectReason;
pub use transport::{Delivery, RecordingTransport, Transport};
