//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WakeSettings::default()`]
//! 2. If `~/.wake/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::WakeSettings;

/// Resolve the path to the settings file (`~/.wake/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
    PathBuf::from(home).join(".wake").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WakeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<WakeSettings> {
    let defaults = serde_json::to_value(WakeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WakeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
#[must_use]
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
/// Each env var has strict parsing rules: integers must be valid and in
/// range; invalid values are silently ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut WakeSettings) {
    // ── Memory ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WAKE_DB_PATH") {
        settings.memory.db_path = v;
    }
    if let Some(v) = read_env_u32("WAKE_MAX_HOT_TOKENS", 256, 1_000_000) {
        settings.memory.max_hot_tokens = v;
    }
    if let Some(v) = read_env_u32("WAKE_COMPACTION_MARGIN", 0, 100_000) {
        settings.memory.compaction_margin_tokens = v;
    }

    // ── Context ─────────────────────────────────────────────────────
    if let Some(v) = read_env_u32("WAKE_MAX_CONTEXT_TOKENS", 256, 2_000_000) {
        settings.context.max_context_tokens = v;
    }

    // ── Retrieval / embedding ───────────────────────────────────────
    if let Some(v) = read_env_usize("WAKE_TOP_K", 1, 100) {
        settings.retrieval.top_k = v;
    }
    if let Some(v) = read_env_string("WAKE_EMBED_ENDPOINT") {
        settings.embedding.endpoint = v;
    }
    if let Some(v) = read_env_usize("WAKE_EMBED_DIMENSIONS", 8, 8_192) {
        settings.embedding.dimensions = v;
    }
    if let Some(v) = read_env_u64("WAKE_EMBED_TIMEOUT_MS", 100, 60_000) {
        settings.embedding.timeout_ms = v;
    }

    // ── Summarizer ──────────────────────────────────────────────────
    if let Some(v) = read_env_u64("WAKE_SUMMARIZER_TIMEOUT_MS", 1_000, 600_000) {
        settings.summarizer.timeout_ms = v;
    }

    // ── Jobs ────────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("WAKE_CONSOLIDATION_INTERVAL", 60, 604_800) {
        settings.jobs.consolidation_interval_secs = v;
    }
    if let Some(v) = read_env_u32("WAKE_WINDOW_DAYS", 1, 90) {
        settings.jobs.window_days = v;
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| (min..=max).contains(v))
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| (min..=max).contains(v))
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| (min..=max).contains(v))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
