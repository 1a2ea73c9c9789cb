//! # hubline-settings
//!
//! Layered configuration for the hubline server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HublineSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `HUBLINE_*` overrides (highest priority)
//!
//! ```no_run
//! use hubline_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
