//! Leveled log sink.

use std::error::Error;

use tracing::{debug, error, info, trace, warn};

use crate::level::LogLevel;

/// Emit `message` at `level`, attaching `error` when present.
///
/// [`LogLevel::Fatal`] is logged at error level with `fatal = true`.
pub fn log(level: LogLevel, message: &str, error: Option<&dyn Error>) {
    let err = error.map(ToString::to_string);
    let err = err.as_deref();
    match level {
        LogLevel::Trace => trace!(error = err, "{message}"),
        LogLevel::Debug => debug!(error = err, "{message}"),
        LogLevel::Info => info!(error = err, "{message}"),
        LogLevel::Warning => warn!(error = err, "{message}"),
        LogLevel::Error => error!(error = err, "{message}"),
        LogLevel::Fatal => error!(fatal = true, error = err, "{message}"),
    }
}
