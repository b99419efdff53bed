//! Meeting session configuration.
//!
//! Configuration is loaded from environment variables; every knob has
//! a default suitable for LAN operation.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default delay between reconnect attempts, in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECONDS: u64 = 3;

/// Default number of reconnect attempts per outage before a peer is
/// considered unreachable.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Default capacity of the session command mailbox.
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Default capacity of the transport/media event funnel.
pub const DEFAULT_LINK_EVENT_BUFFER: usize = 256;

/// Default capacity of the broadcast event stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default label for the per-peer meeting data channel.
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "meeting-data";

/// Meeting session configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between reconnect attempts (default: 3s).
    pub reconnect_delay: Duration,

    /// Reconnect attempts per outage before giving up (default: 5).
    pub reconnect_max_attempts: u32,

    /// Capacity of the session command mailbox (default: 64).
    pub command_buffer: usize,

    /// Capacity of the transport/media event funnel (default: 256).
    pub link_event_buffer: usize,

    /// Capacity of the broadcast event stream (default: 256).
    pub event_capacity: usize,

    /// Label used when opening meeting data channels (default: "meeting-data").
    pub data_channel_label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECONDS),
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            link_event_buffer: DEFAULT_LINK_EVENT_BUFFER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly set value is unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly set value is unusable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let reconnect_delay_seconds = vars
            .get("PARLEY_RECONNECT_DELAY_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECT_DELAY_SECONDS);

        let reconnect_max_attempts = vars
            .get("PARLEY_RECONNECT_MAX_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS);

        let command_buffer = vars
            .get("PARLEY_COMMAND_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_COMMAND_BUFFER);

        let link_event_buffer = vars
            .get("PARLEY_LINK_EVENT_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LINK_EVENT_BUFFER);

        let event_capacity = vars
            .get("PARLEY_EVENT_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EVENT_CAPACITY);

        let data_channel_label = vars
            .get("PARLEY_DATA_CHANNEL_LABEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DATA_CHANNEL_LABEL.to_string());

        // Channel constructors reject zero capacities, catch it here
        if command_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "PARLEY_COMMAND_BUFFER must be at least 1".to_string(),
            ));
        }
        if link_event_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "PARLEY_LINK_EVENT_BUFFER must be at least 1".to_string(),
            ));
        }
        if event_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "PARLEY_EVENT_CAPACITY must be at least 1".to_string(),
            ));
        }
        if data_channel_label.is_empty() {
            return Err(ConfigError::InvalidValue(
                "PARLEY_DATA_CHANNEL_LABEL must not be empty".to_string(),
            ));
        }

        Ok(SessionConfig {
            reconnect_delay: Duration::from_secs(reconnect_delay_seconds),
            reconnect_max_attempts,
            command_buffer,
            link_event_buffer,
            event_capacity,
            data_channel_label,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_empty_uses_defaults() {
        let config = SessionConfig::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(
            config.reconnect_delay,
            Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECONDS)
        );
        assert_eq!(config.reconnect_max_attempts, DEFAULT_RECONNECT_MAX_ATTEMPTS);
        assert_eq!(config.command_buffer, DEFAULT_COMMAND_BUFFER);
        assert_eq!(config.link_event_buffer, DEFAULT_LINK_EVENT_BUFFER);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(config.data_channel_label, DEFAULT_DATA_CHANNEL_LABEL);
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            ("PARLEY_RECONNECT_DELAY_SECONDS".to_string(), "1".to_string()),
            ("PARLEY_RECONNECT_MAX_ATTEMPTS".to_string(), "2".to_string()),
            ("PARLEY_COMMAND_BUFFER".to_string(), "8".to_string()),
            ("PARLEY_LINK_EVENT_BUFFER".to_string(), "16".to_string()),
            ("PARLEY_EVENT_CAPACITY".to_string(), "32".to_string()),
            ("PARLEY_DATA_CHANNEL_LABEL".to_string(), "mtg".to_string()),
        ]);

        let config = SessionConfig::from_vars(&vars).expect("config should load");

        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect_max_attempts, 2);
        assert_eq!(config.command_buffer, 8);
        assert_eq!(config.link_event_buffer, 16);
        assert_eq!(config.event_capacity, 32);
        assert_eq!(config.data_channel_label, "mtg");
    }

    #[test]
    fn test_unparseable_values_fall_back_to_defaults() {
        let vars = HashMap::from([(
            "PARLEY_RECONNECT_MAX_ATTEMPTS".to_string(),
            "lots".to_string(),
        )]);

        let config = SessionConfig::from_vars(&vars).expect("config should load");
        assert_eq!(config.reconnect_max_attempts, DEFAULT_RECONNECT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let vars = HashMap::from([("PARLEY_COMMAND_BUFFER".to_string(), "0".to_string())]);

        let result = SessionConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_empty_channel_label_rejected() {
        let vars = HashMap::from([("PARLEY_DATA_CHANNEL_LABEL".to_string(), String::new())]);

        let result = SessionConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
