//! Server and hub configuration consumed by the core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listener configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Largest accepted WebSocket message or POST body, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Keepalive and timeout knobs shared by every connection of a server.
///
/// Values are milliseconds, the unit embedding applications configure them
/// in; the accessors convert to [`Duration`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubOptions {
    /// How often the server sends a ping.
    pub ping_interval_ms: u64,
    /// Silence after which a connection is considered dead.
    pub ping_timeout_ms: u64,
    /// Period of the liveness check.
    pub keep_alive_check_ms: u64,
    /// Deadline for the handshake request.
    pub handshake_timeout_ms: u64,
    /// How long a long-polling GET waits before returning empty.
    pub long_poll_timeout_ms: u64,
}

impl Default for HubOptions {
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

impl HubOptions {
    /// Ping send period. Never zero.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    /// Inactivity limit.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Liveness check period. Never zero.
    pub fn keep_alive_check(&self) -> Duration {
        Duration::from_millis(self.keep_alive_check_ms.max(1))
    }

    /// Handshake deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Long-poll wait.
    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }
}
