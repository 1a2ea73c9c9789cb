//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HublineSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `HUBLINE_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{HublineSettings, LOG_LEVEL_NAMES, LogFormat};

/// Resolve the settings file path.
///
/// `HUBLINE_SETTINGS` wins; otherwise `~/.hubline/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("HUBLINE_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".hubline").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HublineSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HublineSettings> {
    load_with(path, &|name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: &dyn Fn(&str) -> Option<String>) -> Result<HublineSettings> {
    let defaults = serde_json::to_value(HublineSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HublineSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `HUBLINE_*` environment overrides to loaded settings.
///
/// Invalid or out-of-range values are logged and ignored.
pub fn apply_env_overrides(settings: &mut HublineSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut HublineSettings, env: &dyn Fn(&str) -> Option<String>) {
    let lookup = |name: &str| env(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = lookup("HUBLINE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = checked(lookup, "HUBLINE_PORT", |v| parse_u16_range(v, 1, 65535)) {
        settings.server.port = v;
    }

    // ── Hub timings ─────────────────────────────────────────────────
    let ms = |v: &str| parse_u64_range(v, 1, 3_600_000);
    if let Some(v) = checked(lookup, "HUBLINE_PING_INTERVAL_MS", ms) {
        settings.hub.ping_interval_ms = v;
    }
    if let Some(v) = checked(lookup, "HUBLINE_PING_TIMEOUT_MS", ms) {
        settings.hub.ping_timeout_ms = v;
    }
    if let Some(v) = checked(lookup, "HUBLINE_KEEPALIVE_CHECK_MS", ms) {
        settings.hub.keep_alive_check_ms = v;
    }
    if let Some(v) = checked(lookup, "HUBLINE_HANDSHAKE_TIMEOUT_MS", ms) {
        settings.hub.handshake_timeout_ms = v;
    }
    if let Some(v) = checked(lookup, "HUBLINE_LONG_POLL_TIMEOUT_MS", ms) {
        settings.hub.long_poll_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = checked(lookup, "HUBLINE_LOG_LEVEL", parse_log_level) {
        settings.logging.level = v;
    }
    if let Some(v) = checked(lookup, "HUBLINE_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }
}

fn checked<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Normalise a log level name, rejecting unknown names.
pub fn parse_log_level(val: &str) -> Option<String> {
    let lower = val.to_lowercase();
    LOG_LEVEL_NAMES.contains(&lower.as_str()).then_some(lower)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let merged = deep_merge(target, serde_json::json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_with(Path::new("/nonexistent/settings.json"), &no_env).unwrap();
        assert_eq!(settings, HublineSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "hub": {"pingIntervalMs": 2000}}"#,
        )
        .unwrap();

        let settings = load_with(&path, &no_env).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.hub.ping_interval_ms, 2000);
        assert_eq!(settings.hub.ping_timeout_ms, 30_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let err = load_with(&path, &no_env).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_inconsistent_timings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"hub": {"pingTimeoutMs": 1000}}"#).unwrap();

        let err = load_with(&path, &no_env).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9090}}"#).unwrap();

        let env = env_of(&[("HUBLINE_PORT", "7070"), ("HUBLINE_LOG_FORMAT", "json")]);
        let settings = load_with(&path, &env).unwrap();
        assert_eq!(settings.server.port, 7070);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn overrides_apply_every_key() {
        let env = env_of(&[
            ("HUBLINE_HOST", "0.0.0.0"),
            ("HUBLINE_PING_INTERVAL_MS", "1000"),
            ("HUBLINE_PING_TIMEOUT_MS", "4000"),
            ("HUBLINE_KEEPALIVE_CHECK_MS", "500"),
            ("HUBLINE_HANDSHAKE_TIMEOUT_MS", "2000"),
            ("HUBLINE_LONG_POLL_TIMEOUT_MS", "3000"),
            ("HUBLINE_LOG_LEVEL", "DEBUG"),
        ]);
        let mut settings = HublineSettings::default();
        apply_overrides(&mut settings, &env);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.hub.ping_interval_ms, 1000);
        assert_eq!(settings.hub.ping_timeout_ms, 4000);
        assert_eq!(settings.hub.keep_alive_check_ms, 500);
        assert_eq!(settings.hub.handshake_timeout_ms, 2000);
        assert_eq!(settings.hub.long_poll_timeout_ms, 3000);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let env = env_of(&[
            ("HUBLINE_PORT", "0"),
            ("HUBLINE_PING_INTERVAL_MS", "soon"),
            ("HUBLINE_LOG_LEVEL", "loud"),
            ("HUBLINE_LOG_FORMAT", "xml"),
            ("HUBLINE_HOST", ""),
        ]);
        let mut settings = HublineSettings::default();
        apply_overrides(&mut settings, &env);
        assert_eq!(settings, HublineSettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u16_range("abc", 1, 65535), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("15000", 1, 3_600_000), Some(15_000));
        assert_eq!(parse_u64_range("-1", 1, 3_600_000), None);
        assert_eq!(parse_u64_range("3600001", 1, 3_600_000), None);
    }

    #[test]
    fn parse_log_level_names() {
        assert_eq!(parse_log_level("Warning"), Some("warning".to_string()));
        assert_eq!(parse_log_level("fatal"), Some("fatal".to_string()));
        assert_eq!(parse_log_level("verbose"), None);
    }
}
