//! Layered settings for a collector run.
//!
//! The settings file is a partial JSON document laid over
//! [`CmpscanSettings::default()`]. Nested sections merge key by key, so a
//! file holding only `{"collector": {"shortTimeouts": true}}` keeps every
//! other default. `collector.patterns` is an array and therefore replaces
//! the built-in pattern table wholesale. `CMPSCAN_*` variables are applied
//! last and the result is validated before the collector sees it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use cmpscan_core::AutoAction;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CmpscanSettings;

/// Settings file location: `$CMPSCAN_SETTINGS`, else `~/.cmpscan/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string("CMPSCAN_SETTINGS") {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".cmpscan").join("settings.json")
}

/// Load settings from [`settings_path`].
pub fn load_settings() -> Result<CmpscanSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings with `path` as the file layer.
///
/// A missing file means defaults plus env overrides. Unreadable files,
/// malformed JSON and values that fail [`validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<CmpscanSettings> {
    let mut layered = serde_json::to_value(CmpscanSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let overlay: Value = serde_json::from_str(&content)?;
            debug!(path = %path.display(), "applying settings file");
            layered = deep_merge(layered, overlay);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: CmpscanSettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Lay `source` over `target`: objects merge per key, `null` keeps the
/// target value, anything else replaces it.
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

/// Reject settings the collector cannot run with.
pub fn validate(settings: &CmpscanSettings) -> Result<()> {
    if settings.collector.snippet_max_len == 0 {
        return Err(SettingsError::InvalidValue(
            "collector.snippetMaxLen must be greater than 0".into(),
        ));
    }
    if settings.collector.patterns.iter().any(String::is_empty) {
        return Err(SettingsError::InvalidValue(
            "collector.patterns must not contain empty patterns".into(),
        ));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut CmpscanSettings) {
    if let Some(v) = read_env_string("CMPSCAN_AUTO_ACTION") {
        match parse_auto_action(&v) {
            Some(action) => settings.collector.auto_action = action,
            None => tracing::warn!(key = "CMPSCAN_AUTO_ACTION", value = %v, "invalid auto action, ignoring"),
        }
    }
    if let Some(v) = read_env_bool("CMPSCAN_SHORT_TIMEOUTS") {
        settings.collector.short_timeouts = v;
    }
    if let Some(v) = read_env_u64("CMPSCAN_POLL_ATTEMPTS", 1, 10_000) {
        #[allow(clippy::cast_possible_truncation)]
        let attempts = v as u32;
        settings.collector.poll.max_attempts = attempts;
    }
    if let Some(v) = read_env_u64("CMPSCAN_POLL_INTERVAL_MS", 1, 60_000) {
        settings.collector.poll.interval_ms = v;
    }
    if let Some(v) = read_env_u64("CMPSCAN_SETTLE_MS", 0, 600_000) {
        settings.browser.settle_ms = v;
    }
    if let Some(v) = read_env_string("CMPSCAN_LOG_LEVEL") {
        settings.logging.level = v;
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

/// Parse an auto action; `none`/`off` clears it.
///
/// Returns `Some(None)` to clear, `Some(Some(action))` to set, `None` if invalid.
pub fn parse_auto_action(val: &str) -> Option<Option<AutoAction>> {
    match val.to_lowercase().as_str() {
        "none" | "off" | "null" => Some(None),
        other => other.parse().ok().map(Some),
    }
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
