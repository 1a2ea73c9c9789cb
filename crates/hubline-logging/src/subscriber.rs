//! Global subscriber installation.

use hubline_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::level::LogLevel;

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
///
/// Unknown level names fall back to `info`.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    let level = settings
        .level
        .parse::<LogLevel>()
        .unwrap_or(LogLevel::Info);
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()))
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at startup. Returns `false` when a global subscriber was
/// already installed, in which case nothing changes.
pub fn init_subscriber(settings: &LoggingSettings) -> bool {
    let filter = env_filter(settings);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match settings.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .pretty(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .json()
                    .flatten_event(true),
            )
            .try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let settings = LoggingSettings::default();
        let _ = init_subscriber(&settings);
        assert!(!init_subscriber(&settings));
    }

    #[test]
    fn filter_from_unknown_level_still_builds() {
        let settings = LoggingSettings {
            level: "loud".into(),
            ..LoggingSettings::default()
        };
        let _filter = env_filter(&settings);
    }
}
