//! Retry configuration and backoff calculation.
//!
//! Portable, sync-only building blocks: the async retry execution lives in
//! `wake-engine` (which has access to tokio). Transient provider failures
//! are retried **once** by default; repeated failure triggers the caller's
//! degradation path instead of further retries.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default maximum retries for transient provider failures.
pub const DEFAULT_MAX_RETRIES: u32 = 1;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry logic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Calculate the backoff delay for a retry attempt (0-based).
///
/// Exponential base doubling capped at `max_delay_ms`, with ±`jitter_factor`
/// random jitter applied so concurrent retries don't synchronize.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn calculate_backoff_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let exp = attempt.min(16);
    let base = config
        .base_delay_ms
        .saturating_mul(1_u64 << exp)
        .min(config.max_delay_ms);
    if config.jitter_factor <= 0.0 {
        return base;
    }
    let jitter = config.jitter_factor.clamp(0.0, 1.0);
    let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
    ((base as f64 * factor) as u64).min(config.max_delay_ms)
}
