//! Maps loaded settings onto the server's in-process configuration.

use hubline_server::{HubOptions, ServerConfig};
use hubline_settings::HublineSettings;

/// Listener configuration from settings.
pub fn server_config(settings: &HublineSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_message_size: settings.server.max_message_size,
    }
}

/// Keepalive and timeout options from settings.
pub fn hub_options(settings: &HublineSettings) -> HubOptions {
    HubOptions {
        ping_interval_ms: settings.hub.ping_interval_ms,
        ping_timeout_ms: settings.hub.ping_timeout_ms,
        keep_alive_check_ms: settings.hub.keep_alive_check_ms,
        handshake_timeout_ms: settings.hub.handshake_timeout_ms,
        long_poll_timeout_ms: settings.hub.long_poll_timeout_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_line_up() {
        let settings = HublineSettings::default();
        assert_eq!(hub_options(&settings), HubOptions::default());
        let config = server_config(&settings);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_message_size, ServerConfig::default().max_message_size);
    }

    #[test]
    fn every_timing_is_copied() {
        let mut settings = HublineSettings::default();
        settings.hub.ping_interval_ms = 1;
        settings.hub.ping_timeout_ms = 2;
        settings.hub.keep_alive_check_ms = 3;
        settings.hub.handshake_timeout_ms = 4;
        settings.hub.long_poll_timeout_ms = 5;
        let options = hub_options(&settings);
        assert_eq!(
            (
                options.ping_interval_ms,
                options.ping_timeout_ms,
                options.keep_alive_check_ms,
                options.handshake_timeout_ms,
                options.long_poll_timeout_ms,
            ),
            (1, 2, 3, 4, 5)
        );
    }
}
