//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the keys it changes.

mod hub;
mod logging;
mod server;

pub use hub::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "hub": { "pingIntervalMs": 10000 },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HublineSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Connection keepalive and handshake timings.
    pub hub: HubSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl HublineSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        if self.hub.ping_timeout_ms <= self.hub.ping_interval_ms {
            return Err(crate::SettingsError::InvalidValue(format!(
                "hub.pingTimeoutMs ({}) must exceed hub.pingIntervalMs ({})",
                self.hub.ping_timeout_ms, self.hub.ping_interval_ms
            )));
        }
        if self.hub.keep_alive_check_ms == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "hub.keepAliveCheckMs must be positive".into(),
            ));
        }
        Ok(())
    }
}
