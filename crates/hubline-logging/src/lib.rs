//! # hubline-logging
//!
//! Logging for hubline, built on the `tracing` ecosystem.
//!
//! - [`init_subscriber`] installs the global subscriber (env filter, pretty or JSON)
//! - [`log`] is the leveled sink for embedders that do not speak `tracing` and for the binary's fatal path
//! - [`LogLevel`] maps the level names of the settings file onto tracing levels
//! - [`test_utils::capture_logs`] records events in memory for assertions

#![deny(unsafe_code)]

pub mod level;
pub mod sink;
pub mod subscriber;
pub mod test_utils;

pub use level::{LogLevel, ParseLogLevelError};
pub use sink::log;
pub use subscriber::{env_filter, init_subscriber};
