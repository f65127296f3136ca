//! WebSocket transport for the playsync coordinator.
//!
//! This crate accepts WebSocket connections on `GET /ws`, frames every event
//! as a `{"event": "...", "data": ...}` text message and reports connection
//! lifecycle and inbound events on a channel. It has no knowledge of the
//! coordination rules: [`run_event_loop`] feeds [`ConnectionEvent`]s into a
//! coordinator, and the server's [`ConnectionRouter`] is the coordinator's
//! [`Transport`](playsync_coordinator::Transport).
//!
//! # Example
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use ws_server::{ConnectionEvent, ServerConfig, SyncServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ws_server::ServerError> {
//!     let (tx, mut rx) = mpsc::unbounded_channel::<ConnectionEvent>();
//!     let server = SyncServer::start(ServerConfig::default(), tx).await?;
//!
//!     println!("Listening on ws://{}/ws", server.local_addr());
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     server.shutdown().await
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod router;
mod server;

pub use bridge::{dispatch_event, run_event_loop};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use router::{CloseReason, ConnectionEvent, ConnectionRouter, Outgoing};
pub use server::{routes, SyncServer};
