//! WebRTC configuration

use serde::{Deserialize, Serialize};

/// Public STUN servers used when none are configured
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.stunprotocol.org:3478",
    "stun:stun.l.google.com:19302",
];

/// WebRTC configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// ICE server URLs (STUN only, no credentials)
    pub ice_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WebRtcConfig {
    /// Check every entry looks like a STUN/TURN URL
    pub fn invalid_servers(&self) -> Vec<&str> {
        self.ice_servers
            .iter()
            .map(String::as_str)
            .filter(|url| {
                !["stun:", "stuns:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme))
            })
            .collect()
    }
}
