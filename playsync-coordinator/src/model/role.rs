//! Endpoint role enumeration

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// What an endpoint does in a session
///
/// Fixed at first identification and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    /// Issues playback commands; never electable as host
    #[serde(rename = "controller")]
    Controller,
    /// Presents media output; electable as host
    #[serde(rename = "tv")]
    Display,
}

impl Role {
    /// Parse from the wire value used in `identify`
    ///
    /// Accepts `"tv"` and `"display"` for displays and `"controller"` for
    /// controllers, case-insensitively.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tv" | "display" => Some(Role::Display),
            "controller" => Some(Role::Controller),
            _ => None,
        }
    }

    /// Wire value used in outbound payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Controller => "controller",
            Role::Display => "tv",
        }
    }

    pub fn is_display(&self) -> bool {
        matches!(self, Role::Display)
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Role::from_wire(&value).ok_or_else(|| {
            serde::de::Error::unknown_variant(&value, &["controller", "tv", "display"])
        })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
