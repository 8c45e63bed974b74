//! The summarizer contract and its LLM-backed implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;
use wake_core::errors::{ProviderError, ProviderKind, Result, WakeError};
use wake_core::llm::LlmClient;
use wake_core::messages::Message;
use wake_settings::SummarizerSettings;

use crate::transcript::serialize_transcript;

/// Instructions prepended to every summarization call.
///
/// The contract: entities, decisions, open questions, and turning points
/// survive; concrete values are copied, never paraphrased.
const SUMMARY_INSTRUCTIONS: &str = "\
Compress the following conversation excerpt into a compact summary.
Preserve: named entities and people, stated preferences and decisions, \
open questions, and emotionally salient turning points.
Copy all numbers, dates, and identifiers verbatim; never paraphrase \
concrete values.
Respond with the summary text only.";

/// Compresses an ordered message span into summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize the given messages.
    ///
    /// Fails with `InvalidInput` on an empty span; the caller must not call
    /// with a zero-length span.
    async fn summarize(&self, messages: &[Message]) -> Result<String>;
}

/// LLM-backed summarizer with a call timeout.
pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    max_transcript_chars: usize,
}

impl LlmSummarizer {
    /// Create a summarizer over the given completion client.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, settings: &SummarizerSettings) -> Self {
        Self {
            llm,
            timeout: Duration::from_millis(settings.timeout_ms),
            max_transcript_chars: settings.max_transcript_chars,
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String> {
        if messages.is_empty() {
            return Err(WakeError::invalid_input("cannot summarize an empty span"));
        }

        let transcript = serialize_transcript(messages, self.max_transcript_chars);
        let prompt = format!("{SUMMARY_INSTRUCTIONS}\n\n{transcript}");
        trace!(
            messages = messages.len(),
            transcript_chars = transcript.len(),
            "calling summarizer"
        );

        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.timeout.as_millis() as u64;
        let completion = tokio::time::timeout(self.timeout, self.llm.complete(&prompt))
            .await
            .map_err(|_| ProviderError::timeout(ProviderKind::Completion, timeout_ms))??;

        let summary = completion.trim();
        if summary.is_empty() {
            return Err(ProviderError::new(
                ProviderKind::Completion,
                "summarizer returned empty output",
            )
            .with_retryable(true)
            .into());
        }
        Ok(summary.to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
