use serde::{Deserialize, Serialize};

/// Per-connection timing settings, all in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Interval between server-sent pings.
    pub ping_interval_ms: u64,
    /// Silence after which a connection is considered dead.
    pub ping_timeout_ms: u64,
    /// Period of the inactivity check.
    pub keep_alive_check_ms: u64,
    /// Deadline for the client's handshake request.
    pub handshake_timeout_ms: u64,
    /// How long a long-polling GET waits before returning empty.
    pub long_poll_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 15_000,
            ping_timeout_ms: 30_000,
            keep_alive_check_ms: 5_000,
            handshake_timeout_ms: 15_000,
            long_poll_timeout_ms: 90_000,
        }
    }
}
