//! Error types for the playsync-coordinator crate.

/// Errors surfaced by the coordinator.
///
/// None of these are fatal: a failed inbound message is dropped and the
/// session carries on for every other endpoint.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An inbound message could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors from decoding inbound events.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The event name is not part of the protocol
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The payload does not have the shape the event requires
    #[error("Invalid payload for {event}: {source}")]
    InvalidPayload {
        /// The event name
        event: String,
        /// The underlying decode failure
        #[source]
        source: serde_json::Error,
    },

    /// The frame is not an `{event, data}` envelope
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// Convenience type alias for coordinator results.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
