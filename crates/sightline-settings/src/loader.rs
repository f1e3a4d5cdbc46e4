//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SightlineSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{MAX_PAUSE_TIMEOUT_MINUTES, SightlineSettings};
use crate::validate::validate;

/// Resolve the settings file path: `$SIGHTLINE_CONFIG` or `config/sightline.json`.
pub fn settings_path() -> PathBuf {
    read_env_string("SIGHTLINE_CONFIG")
        .map_or_else(|| PathBuf::from("config").join("sightline.json"), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SightlineSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. Invalid JSON or values
/// that fail validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<SightlineSettings> {
    let defaults = serde_json::to_value(SightlineSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SightlineSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut SightlineSettings) {
    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SIGHTLINE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("SIGHTLINE_JSON_LOGS") {
        settings.logging.json = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SIGHTLINE_DB_PATH") {
        settings.store.db_path = v;
    }

    // ── Breakpoints ─────────────────────────────────────────────────
    if let Some(v) = read_env_bool("SIGHTLINE_ENABLE_BREAKPOINTS") {
        settings.breakpoints.enable_breakpoints = v;
    }
    if let Some(v) = read_env_usize("SIGHTLINE_MAX_PAUSED_TRACES", 1, 1000) {
        settings.breakpoints.max_paused_traces = v;
    }
    if let Some(v) = read_env_u64("SIGHTLINE_DEFAULT_TIMEOUT_MINUTES", 1, MAX_PAUSE_TIMEOUT_MINUTES) {
        settings.breakpoints.default_timeout_minutes = v;
    }
    if let Some(v) = read_env_string("SIGHTLINE_BREAKPOINTS_FILE") {
        settings.breakpoints.storage_path = Some(v);
    }

    // ── Retention ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("SIGHTLINE_ARCHIVE_DIR") {
        settings.retention.archive_dir = v;
    }
    if let Some(v) = read_env_bool("SIGHTLINE_AUTO_CLEANUP") {
        settings.retention.enable_auto_cleanup = v;
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"store": {"pool_size": 4, "db_path": "a.db"}});
        let source = serde_json::json!({"store": {"pool_size": 8}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["store"]["pool_size"], 8);
        assert_eq!(merged["store"]["db_path"], "a.db");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"rules": [1, 2, 3]});
        let source = serde_json::json!({"rules": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["rules"], serde_json::json!([4]));
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
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"b": 2});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/sightline.json");
        let settings = load_settings_from_path(path).unwrap();
        assert_eq!(settings.breakpoints, SightlineSettings::default().breakpoints);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sightline.json");
        std::fs::write(
            &path,
            r#"{"breakpoints": {"max_paused_traces": 3}, "circuit_breakers": {"tracing": {"failure_threshold": 7}}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.breakpoints.max_paused_traces, 3);
        assert_eq!(settings.breakpoints.max_breakpoints, 50);
        let tracing = &settings.circuit_breakers["tracing"];
        assert_eq!(tracing.failure_threshold, 7);
        assert_eq!(tracing.success_threshold, 2);
        assert!(settings.circuit_breakers.contains_key("database"));
    }

    #[test]
    fn load_replaces_rule_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sightline.json");
        std::fs::write(
            &path,
            r#"{"retention": {"rules": [{"category": "trace_events", "policy": "short_term", "retention_days": 7}]}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.retention.rules.len(), 1);
        assert_eq!(settings.retention.rules[0].retention_days, 7);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sightline.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sightline.json");
        std::fs::write(&path, r#"{"breakpoints": {"max_paused_traces": 0}}"#).unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::InvalidValue(_)));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("30", 1, 1440), Some(30));
        assert_eq!(parse_u64_range("0", 1, 1440), None);
        assert_eq!(parse_usize_range("5000", 1, 1000), None);
        assert_eq!(parse_usize_range("-1", 1, 1000), None);
        assert_eq!(parse_usize_range("abc", 1, 1000), None);
    }
}
