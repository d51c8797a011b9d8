//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VicinitySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `VICINITY_*` environment overrides (highest priority)
//!
//! Relative store and log paths are resolved against the settings directory.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::VicinitySettings;

/// `~/.vicinity`, or `/tmp/.vicinity` when `HOME` is unset.
pub fn vicinity_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vicinity")
}

/// Resolve the path to the settings file (`~/.vicinity/settings.json`).
pub fn settings_path() -> PathBuf {
    vicinity_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VicinitySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error, as is a merged
/// result that fails [`VicinitySettings::validate`].
pub fn load_settings_from_path(path: &Path) -> Result<VicinitySettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<VicinitySettings> {
    let defaults = serde_json::to_value(VicinitySettings::default())?;

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

/// Resolve a configured path: absolute paths pass through, relative ones land
/// under `base`.
pub fn resolve_path(base: &Path, configured: &str) -> PathBuf {
    let p = Path::new(configured);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `VICINITY_*` environment variables.
pub fn apply_env_overrides(settings: &mut VicinitySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and leave the file/default value
/// in place.
pub fn apply_overrides<F>(settings: &mut VicinitySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Overrides { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("VICINITY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("VICINITY_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("VICINITY_WS_PATH") {
        settings.server.ws_path = v;
    }
    if let Some(v) = env.usize("VICINITY_MAX_SEND_QUEUE", 1, 65_536) {
        settings.server.max_send_queue = v;
    }

    // ── Presence / proximity ────────────────────────────────────────
    if let Some(v) = env.u64("VICINITY_HEARTBEAT_TIMEOUT_SECS", 1, 86_400) {
        settings.presence.heartbeat_timeout_secs = v;
    }
    if let Some(v) = env.u64("VICINITY_SWEEP_INTERVAL_SECS", 1, 3_600) {
        settings.presence.sweep_interval_secs = v;
    }
    if let Some(v) = env.f64("VICINITY_RADIUS_M", 1.0, 100_000.0) {
        settings.proximity.radius_m = v;
    }
    if let Some(v) = env.u64("VICINITY_MIN_UPDATE_INTERVAL_MS", 0, 60_000) {
        settings.proximity.min_update_interval_ms = v;
    }
    if let Some(v) = env.u64("VICINITY_BROADCAST_INTERVAL_SECS", 0, 3_600) {
        settings.proximity.broadcast_interval_secs = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env.bool("VICINITY_AUTH_REQUIRED") {
        settings.auth.required = v;
    }
    if let Some(v) = env.string("VICINITY_SHARED_SECRET") {
        settings.auth.shared_secret = Some(v);
    }

    // ── Integrations ────────────────────────────────────────────────
    if let Some(v) = env.bool("VICINITY_RADIO_ENABLED") {
        settings.radio.enabled = v;
    }
    if let Some(v) = env.string("VICINITY_RADIO_DEVICE") {
        settings.radio.device = Some(v);
    }
    if let Some(v) = env.bool("VICINITY_FANOUT_ENABLED") {
        settings.fanout.enabled = v;
    }
    if let Some(v) = env.string("VICINITY_FANOUT_ORIGIN") {
        settings.fanout.origin = Some(v);
    }
    if let Some(v) = env.bool("VICINITY_STORE_ENABLED") {
        settings.store.enabled = v;
    }
    if let Some(v) = env.string("VICINITY_STORE_PATH") {
        settings.store.path = v;
    }

    // ── Telemetry ───────────────────────────────────────────────────
    if let Some(v) = env.string("VICINITY_LOG_LEVEL") {
        settings.telemetry.level = v;
    }
    if let Some(v) = env.bool("VICINITY_LOG_JSON") {
        settings.telemetry.json = v;
    }
    if let Some(v) = env.bool("VICINITY_LOG_TO_SQLITE") {
        settings.telemetry.log_to_sqlite = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Lookup readers ──────────────────────────────────────────────────────────

struct Overrides<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Overrides<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        self.parsed(name, "f64", |v| parse_f64_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8090, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_file_layer(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, VicinitySettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9100}, "rateLimits": {"sendMessage": {"capacity": 10, "intervalMs": 2000}}}"#,
        )
        .unwrap();

        let settings = read_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.ws_path, "/ws");
        assert_eq!(settings.rate_limits.send_message.capacity, 10);
        assert_eq!(settings.rate_limits.location_update.capacity, 5);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"proximity": {"radiusM": 0}}"#).unwrap();

        let mut settings = read_file_layer(&path).unwrap();
        apply_overrides(&mut settings, lookup(&[]));
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    // ── apply_overrides ─────────────────────────────────────────────

    #[test]
    fn overrides_apply_over_file_values() {
        let mut settings = VicinitySettings::default();
        settings.server.port = 9100;
        apply_overrides(
            &mut settings,
            lookup(&[
                ("VICINITY_PORT", "9200"),
                ("VICINITY_RADIUS_M", "250.5"),
                ("VICINITY_RADIO_ENABLED", "yes"),
                ("VICINITY_RADIO_DEVICE", "/dev/ttyUSB0"),
                ("VICINITY_SHARED_SECRET", "s3cret"),
                ("VICINITY_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.proximity.radius_m, 250.5);
        assert!(settings.radio.enabled);
        assert_eq!(settings.radio.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(settings.auth.shared_secret.as_deref(), Some("s3cret"));
        assert_eq!(settings.telemetry.level, "debug");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = VicinitySettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("VICINITY_PORT", "99999"),
                ("VICINITY_RADIUS_M", "NaN"),
                ("VICINITY_AUTH_REQUIRED", "maybe"),
                ("VICINITY_HOST", ""),
            ]),
        );
        assert_eq!(settings, VicinitySettings::default());
    }

    // ── resolve_path ────────────────────────────────────────────────

    #[test]
    fn resolve_relative_and_absolute() {
        let base = Path::new("/var/lib/vicinity");
        assert_eq!(resolve_path(base, "v.db"), PathBuf::from("/var/lib/vicinity/v.db"));
        assert_eq!(resolve_path(base, "/data/v.db"), PathBuf::from("/data/v.db"));
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "NO"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("0", 0, 65535), Some(0));
        assert_eq!(parse_u16_range("70000", 0, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 2000), None);
        assert_eq!(parse_usize_range("abc", 1, 10), None);
        assert_eq!(parse_f64_range("12.5", 1.0, 100.0), Some(12.5));
        assert_eq!(parse_f64_range("inf", 1.0, f64::MAX), None);
        assert_eq!(parse_f64_range("0.5", 1.0, 100.0), None);
    }
}
