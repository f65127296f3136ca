//! Model types for the coordinator

mod canonical;
mod connection_id;
mod endpoint;
mod role;

pub use canonical::{CanonicalState, PlaybackPatch};
pub use connection_id::ConnectionId;
pub use endpoint::{placeholder_name, Endpoint, EndpointState, Presence};
pub use role::Role;

/// Lenient millisecond timestamps.
///
/// Browser clients produce `Date.now()` integers, but some send fractional
/// values from `performance.now()`-derived clocks. Both are accepted and
/// truncated to whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<f64>::deserialize(deserializer)?;
        Ok(value.filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64))
    }
}

/// Overwrite `slot` only when the patch carries a value.
pub(crate) fn merge_field<T>(slot: &mut Option<T>, value: Option<T>) {
    if let Some(value) = value {
        *slot = Some(value);
    }
}
