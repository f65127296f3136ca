//! Connection identity type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle assigned by the transport when a connection is accepted
///
/// Stable only for the lifetime of one physical connection. A client that
/// reconnects gets a new id and may present the old one in `identify` to
/// resume its record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new ConnectionId, trimming surrounding whitespace
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.len() == id.len() {
            Self(id)
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Generates a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        ConnectionId::new(s)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        ConnectionId::new(s)
    }
}
