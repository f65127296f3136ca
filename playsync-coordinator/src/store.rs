//! Canonical playback state store
//!
//! Holds at most one [`CanonicalState`]. Updates are last-write-wins by
//! arrival, except that an update carrying a `stateSequence` lower than the
//! stored one is discarded. The stored sequence advances whenever accepted
//! content changes, so a repeated identical report is a no-op apart from the
//! receipt stamps. A client sequence is adopted only when it lands within
//! [`MAX_SEQUENCE_SKEW`] of the stored one.

use tracing::{debug, warn};

use crate::model::{CanonicalState, ConnectionId, PlaybackPatch};

/// How far ahead of the stored sequence a client-supplied `stateSequence`
/// may jump and still be adopted
pub const MAX_SEQUENCE_SKEW: u64 = 1_024;

/// How producer timestamps in an update are used
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Compensation {
    /// Plain report; no latency figures are derived
    None,
    /// Producer sample time in Unix milliseconds
    Producer(u64),
    /// Producer sample time from the host's master channel; also stamps
    /// `masterTimestamp` with the receipt time
    Master(u64),
}

/// Result of [`PlaybackStore::apply_update`]
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The update was merged; carries the new snapshot
    Accepted(CanonicalState),
    /// The update's sequence was older than the stored one
    Stale { incoming: u64, current: u64 },
}

impl UpdateOutcome {
    pub fn accepted(self) -> Option<CanonicalState> {
        match self {
            UpdateOutcome::Accepted(state) => Some(state),
            UpdateOutcome::Stale { .. } => None,
        }
    }
}

/// One-way latency estimate from a producer timestamp, in milliseconds
///
/// Assumes symmetric transit, so half the observed delay. A producer clock
/// ahead of ours yields zero.
pub fn network_latency(now: u64, producer_timestamp: u64) -> f64 {
    now.saturating_sub(producer_timestamp) as f64 / 2.0
}

/// Playback position corrected for transit delay, in seconds
pub fn adjusted_time(current_time: f64, latency_millis: f64) -> f64 {
    current_time + latency_millis / 1000.0
}

#[derive(Debug, Default)]
pub struct PlaybackStore {
    state: Option<CanonicalState>,
}

impl PlaybackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `patch` onto the canonical state, creating it if absent
    ///
    /// # Arguments
    /// * `origin` - Display whose report this is; `None` leaves `tvId` as is
    /// * `patch` - Fields to merge
    /// * `compensation` - Whether and how to derive latency figures
    /// * `now` - Receipt time in Unix milliseconds
    pub fn apply_update(
        &mut self,
        origin: Option<&ConnectionId>,
        patch: PlaybackPatch,
        compensation: Compensation,
        now: u64,
    ) -> UpdateOutcome {
        let incoming = patch.state_sequence;
        let current = self.state.as_ref().map(|s| s.state_sequence);

        if let (Some(incoming), Some(current)) = (incoming, current) {
            if incoming < current {
                debug!(incoming, current, "Discarding stale playback update");
                return UpdateOutcome::Stale { incoming, current };
            }
        }

        let created = self.state.is_none();
        let mut next = self.state.clone().unwrap_or_default();
        let before = next.clone();

        next.apply(patch);
        if let Some(origin) = origin {
            next.tv_id = Some(origin.clone());
        }

        match compensation {
            Compensation::None => {
                next.network_latency = None;
                next.adjusted_time = None;
            }
            Compensation::Producer(producer) | Compensation::Master(producer) => {
                let latency = network_latency(now, producer);
                next.network_latency = Some(latency);
                next.adjusted_time = Some(adjusted_time(next.current_time, latency));
            }
        }
        if let Compensation::Master(_) = compensation {
            next.master_timestamp = Some(now);
        }

        if created || !next.same_content(&before) {
            next.state_sequence = next.state_sequence.saturating_add(1);
        }
        if let Some(incoming) = incoming {
            if incoming <= next.state_sequence.saturating_add(MAX_SEQUENCE_SKEW) {
                next.state_sequence = next.state_sequence.max(incoming);
            } else {
                warn!(
                    incoming,
                    current = next.state_sequence,
                    "Ignoring implausible stateSequence"
                );
            }
        }
        next.timestamp = now;
        next.last_update = Some(now);

        self.state = Some(next.clone());
        UpdateOutcome::Accepted(next)
    }

    pub fn snapshot(&self) -> Option<CanonicalState> {
        self.state.clone()
    }

    pub fn get(&self) -> Option<&CanonicalState> {
        self.state.as_ref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.state_sequence)
    }

    /// Whether the state was produced by `id`
    pub fn originated_from(&self, id: &ConnectionId) -> bool {
        self.state
            .as_ref()
            .and_then(|s| s.tv_id.as_ref())
            .map_or(false, |tv| tv == id)
    }

    pub fn clear(&mut self) {
        if self.state.take().is_some() {
            debug!("Cleared canonical playback state");
        }
    }

    /// Follow an originating display that moved to a new connection id
    pub fn rekey(&mut self, old: &ConnectionId, new: &ConnectionId) {
        if let Some(state) = self.state.as_mut() {
            if state.tv_id.as_ref() == Some(old) {
                state.tv_id = Some(new.clone());
            }
        }
    }
}
