//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HuddleSettings::default()`]
//! 2. If `~/.huddle/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::HuddleSettings;

/// Resolve the Huddle home directory (`~/.huddle`).
pub fn huddle_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".huddle")
}

/// Resolve the path to the settings file (`~/.huddle/settings.json`).
pub fn settings_path() -> PathBuf {
    huddle_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HuddleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<HuddleSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the settings file, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<HuddleSettings> {
    let defaults = serde_json::to_value(HuddleSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Reject settings the hub or client cannot run with.
pub fn validate(settings: &HuddleSettings) -> Result<()> {
    if settings.server.sweep_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sweepIntervalMs must be greater than zero".into(),
        ));
    }
    if settings.server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendQueueCapacity must be greater than zero".into(),
        ));
    }
    if settings.client.probe_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "client.probeIntervalMs must be greater than zero".into(),
        ));
    }
    Ok(())
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut HuddleSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using an arbitrary variable lookup.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_overrides_from(settings: &mut HuddleSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HUDDLE_HOST") {
        settings.server.host = v;
    }
    // `PORT` is honoured for hosting platforms; `HUDDLE_PORT` wins.
    if let Some(v) = env.u16_in("PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u16_in("HUDDLE_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64_in("HUDDLE_SWEEP_INTERVAL_MS", 100, 3_600_000) {
        settings.server.sweep_interval_ms = v;
    }
    if let Some(v) = env.u64_in("HUDDLE_SEND_QUEUE", 1, 65_536) {
        settings.server.send_queue_capacity = usize::try_from(v).unwrap_or(usize::MAX);
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HUDDLE_SERVER_URL") {
        settings.client.server_url = v;
    }
    if let Some(v) = env.u64_in("HUDDLE_PROBE_INTERVAL_MS", 100, 3_600_000) {
        settings.client.probe_interval_ms = v;
    }
    if let Some(v) = env.bool("HUDDLE_RECONNECT") {
        settings.client.reconnect.enabled = v;
    }
    if let Some(v) = env.u64_in("HUDDLE_RECONNECT_MAX_ATTEMPTS", 0, 1000) {
        settings.client.reconnect.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("HUDDLE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("HUDDLE_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

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

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16_in(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server.port, 3000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"sweepIntervalMs":5000},"logging":{"json":true}}"#)
            .unwrap();
        let s = load_file_layer(&path).unwrap();
        assert_eq!(s.server.sweep_interval_ms, 5000);
        assert_eq!(s.server.port, 3000);
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn validate_rejects_zero_sweep() {
        let mut s = HuddleSettings::default();
        s.server.sweep_interval_ms = 0;
        assert!(matches!(validate(&s), Err(SettingsError::InvalidValue(_))));
        assert!(validate(&HuddleSettings::default()).is_ok());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut s = HuddleSettings::default();
        apply_overrides_from(
            &mut s,
            lookup(&[
                ("HUDDLE_HOST", "127.0.0.1"),
                ("HUDDLE_PORT", "4100"),
                ("HUDDLE_SWEEP_INTERVAL_MS", "1000"),
                ("HUDDLE_SERVER_URL", "http://hub:4100"),
                ("HUDDLE_RECONNECT", "off"),
                ("HUDDLE_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 4100);
        assert_eq!(s.server.sweep_interval_ms, 1000);
        assert_eq!(s.client.server_url, "http://hub:4100");
        assert!(!s.client.reconnect.enabled);
        assert!(s.logging.json);
    }

    #[test]
    fn huddle_port_wins_over_port() {
        let mut s = HuddleSettings::default();
        apply_overrides_from(&mut s, lookup(&[("PORT", "8000"), ("HUDDLE_PORT", "8001")]));
        assert_eq!(s.server.port, 8001);

        let mut s = HuddleSettings::default();
        apply_overrides_from(&mut s, lookup(&[("PORT", "8000")]));
        assert_eq!(s.server.port, 8000);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut s = HuddleSettings::default();
        apply_overrides_from(
            &mut s,
            lookup(&[
                ("HUDDLE_PORT", "0"),
                ("HUDDLE_SWEEP_INTERVAL_MS", "fast"),
                ("HUDDLE_LOG_JSON", "maybe"),
                ("HUDDLE_HOST", ""),
            ]),
        );
        assert_eq!(s.server.port, 3000);
        assert_eq!(s.server.sweep_interval_ms, 30_000);
        assert!(!s.logging.json);
        assert_eq!(s.server.host, "0.0.0.0");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
        assert_eq!(parse_u16_range("80", 1, 100), Some(80));
        assert_eq!(parse_u16_range("101", 1, 100), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }
}
