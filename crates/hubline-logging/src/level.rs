//! Log levels.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity of a message sent to [`crate::log`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Intermediate values, decisions.
    Debug,
    /// Outcomes, summaries.
    Info,
    /// Non-fatal issues.
    #[serde(alias = "warn")]
    Warning,
    /// Errors.
    Error,
    /// Unrecoverable errors. Logged at error level; never exits the process.
    Fatal,
}

/// A level name that is not one of the known names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLogLevelError(pub String);

impl LogLevel {
    /// The `tracing` level this maps onto.
    #[must_use]
    pub const fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error | Self::Fatal => tracing::Level::ERROR,
        }
    }

    /// Directive string for an `EnvFilter`.
    #[must_use]
    pub const fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Fatal => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}
