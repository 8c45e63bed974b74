//! # wake-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`WakeSettings::default()`]
//! 2. **User file** — `~/.wake/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `WAKE_*` overrides (highest priority)
//!
//! All types are `camelCase` serde with `#[serde(default)]`, so a partial
//! settings file only overrides what it names.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
