//! Configuration types for the playsync-coordinator crate
//!
//! Timing values control the reconnection manager (grace periods, heartbeats
//! and the inactivity sweep); thresholds control the buffering gate.

use std::time::Duration;

use crate::error::{CoordinatorError, Result};

/// Configuration for the SyncCoordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a transiently disconnected endpoint keeps its record
    /// Default: 30 seconds
    pub grace_period: Duration,

    /// Interval between application-level pings on each connection
    /// Default: 25 seconds
    pub heartbeat_interval: Duration,

    /// How long to wait for any inbound traffic after a ping
    /// Default: 10 seconds
    pub heartbeat_timeout: Duration,

    /// Silence after which a connection is considered dead
    /// Default: 60 seconds
    pub inactive_timeout: Duration,

    /// Interval of the backstop inactivity sweep
    /// Default: 30 seconds
    pub sweep_interval: Duration,

    /// Buffer level under which a buffering display is starving
    /// Default: 0.10
    pub low_buffer_threshold: f64,

    /// Buffer level above which a display can serve state to a starving peer
    /// Default: 0.50
    pub healthy_buffer_threshold: f64,

    /// Prefix for generated display names
    /// Default: "TV"
    pub display_name_prefix: String,

    /// Run per-connection heartbeat tasks
    /// Default: true
    pub enable_heartbeat: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(10),
            inactive_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            low_buffer_threshold: 0.10,
            healthy_buffer_threshold: 0.50,
            display_name_prefix: "TV".to_string(),
            enable_heartbeat: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new CoordinatorConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config tuned for flaky networks: longer grace, slower eviction
    pub fn lenient() -> Self {
        Self {
            grace_period: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(20),
            inactive_timeout: Duration::from_secs(120),
            ..Default::default()
        }
    }

    /// Create a config that detects dead connections quickly
    pub fn fast_failover() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(5),
            inactive_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Create a config with heartbeat tasks disabled
    pub fn no_heartbeat() -> Self {
        Self {
            enable_heartbeat: false,
            ..Default::default()
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_inactive_timeout(mut self, inactive_timeout: Duration) -> Self {
        self.inactive_timeout = inactive_timeout;
        self
    }

    pub fn with_buffer_thresholds(mut self, low: f64, healthy: f64) -> Self {
        self.low_buffer_threshold = low;
        self.healthy_buffer_threshold = healthy;
        self
    }

    pub fn with_display_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.display_name_prefix = prefix.into();
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.enable_heartbeat && self.heartbeat_interval == Duration::ZERO {
            return Err(CoordinatorError::Configuration(
                "Heartbeat interval must be greater than 0".to_string(),
            ));
        }

        if self.enable_heartbeat && self.heartbeat_timeout >= self.heartbeat_interval {
            return Err(CoordinatorError::Configuration(
                "Heartbeat timeout must be shorter than the heartbeat interval".to_string(),
            ));
        }

        if self.inactive_timeout <= self.heartbeat_timeout {
            return Err(CoordinatorError::Configuration(
                "Inactive timeout must be longer than the heartbeat timeout".to_string(),
            ));
        }

        if self.sweep_interval == Duration::ZERO {
            return Err(CoordinatorError::Configuration(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.low_buffer_threshold) || !in_range(self.healthy_buffer_threshold) {
            return Err(CoordinatorError::Configuration(
                "Buffer thresholds must be between 0 and 1".to_string(),
            ));
        }

        if self.low_buffer_threshold >= self.healthy_buffer_threshold {
            return Err(CoordinatorError::Configuration(
                "Invalid buffer thresholds: low must be less than healthy".to_string(),
            ));
        }

        if self.display_name_prefix.trim().is_empty() {
            return Err(CoordinatorError::Configuration(
                "Display name prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_period, Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.low_buffer_threshold, 0.10);
        assert_eq!(config.healthy_buffer_threshold, 0.50);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(CoordinatorConfig::lenient().validate().is_ok());
        assert!(CoordinatorConfig::fast_failover().validate().is_ok());
        assert!(CoordinatorConfig::no_heartbeat().validate().is_ok());
    }

    #[test]
    fn test_invalid_thresholds() {
        let config = CoordinatorConfig::default().with_buffer_thresholds(0.6, 0.5);
        assert!(matches!(
            config.validate(),
            Err(CoordinatorError::Configuration(_))
        ));

        let config = CoordinatorConfig::default().with_buffer_thresholds(0.1, 1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_timeout_must_fit_interval() {
        let config = CoordinatorConfig::default()
            .with_heartbeat(Duration::from_secs(5), Duration::from_secs(5));
        assert!(config.validate().is_err());

        // Irrelevant once heartbeats are off
        let config = CoordinatorConfig::no_heartbeat()
            .with_heartbeat(Duration::from_secs(5), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let config = CoordinatorConfig::default().with_display_name_prefix("  ");
        assert!(config.validate().is_err());
    }
}
