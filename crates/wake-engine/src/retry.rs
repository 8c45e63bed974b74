//! Async retry execution over the portable backoff math in `wake-core`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use wake_core::errors::Result;
use wake_core::messages::Message;
use wake_core::retry::{RetryConfig, calculate_backoff_delay};
use wake_summarizer::Summarizer;

/// Run `op`, retrying retryable failures with jittered backoff.
///
/// Non-retryable errors (invalid input, persistence, conflicts) propagate
/// immediately. The default config retries once.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0_u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = calculate_backoff_delay(config, attempt);
                debug!(attempt, delay_ms = delay, error = %e, "retrying after backoff");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Summarizer wrapper that retries transient provider failures with
/// backoff before the store's own smaller-span/truncation ladder kicks in.
pub struct RetryingSummarizer {
    inner: Arc<dyn Summarizer>,
    config: RetryConfig,
}

impl RetryingSummarizer {
    /// Wrap a summarizer with the given retry policy.
    #[must_use]
    pub fn new(inner: Arc<dyn Summarizer>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Summarizer for RetryingSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        with_retry(&self.config, || self.inner.summarize(messages)).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
