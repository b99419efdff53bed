//! WebRTC link configuration.
//!
//! The default configuration carries no ICE servers: on a LAN, host
//! candidates are enough and no STUN round trip is wanted. Deployments
//! that span NATs list STUN/TURN URLs through the environment.

use std::collections::HashMap;
use std::env;

/// Configuration for the WebRTC transport layer.
#[derive(Debug, Clone, Default)]
pub struct WebRtcLinkConfig {
    /// STUN/TURN server URLs; empty means host candidates only.
    pub ice_servers: Vec<String>,
}

impl WebRtcLinkConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// `PARLEY_ICE_SERVERS` holds a comma-separated URL list; blank
    /// entries are dropped.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let ice_servers = vars
            .get("PARLEY_ICE_SERVERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self { ice_servers }
    }
}
