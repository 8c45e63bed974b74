//! The completion-provider contract.
//!
//! The actual LLM clients (Anthropic, OpenAI, local models) live outside
//! this subsystem; the summarizer and consolidation jobs only depend on
//! this trait. [`ScriptedLlm`] is the deterministic test double used across
//! the workspace.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{ProviderError, ProviderKind, Result};

/// A completion provider: context in, text out.
///
/// Calls may block on the network; implementations are expected to enforce
/// their own timeout. Callers never hold a conversation lock across a call.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete the given prompt, returning generated text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Scripted LLM test double.
///
/// Returns pre-loaded responses in order; once the script is exhausted it
/// returns a non-retryable provider error. Load an `Err` step to simulate
/// a provider failure mid-script.
#[derive(Default)]
pub struct ScriptedLlm {
    steps: Mutex<Vec<ScriptStep>>,
    calls: Mutex<Vec<String>>,
}

enum ScriptStep {
    Respond(String),
    Fail { retryable: bool },
}

impl ScriptedLlm {
    /// Create an empty script (every call fails).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    #[must_use]
    pub fn then_respond(self, text: impl Into<String>) -> Self {
        self.steps.lock().push(ScriptStep::Respond(text.into()));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn then_fail(self, retryable: bool) -> Self {
        self.steps.lock().push(ScriptStep::Fail { retryable });
        self
    }

    /// Prompts received so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.lock().push(prompt.to_owned());
        let step = {
            let mut steps = self.steps.lock();
            if steps.is_empty() {
                None
            } else {
                Some(steps.remove(0))
            }
        };
        match step {
            Some(ScriptStep::Respond(text)) => Ok(text),
            Some(ScriptStep::Fail { retryable }) => Err(ProviderError::new(
                ProviderKind::Completion,
                "scripted failure",
            )
            .with_retryable(retryable)
            .into()),
            None => Err(ProviderError::new(
                ProviderKind::Completion,
                "script exhausted",
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_in_order() {
        let llm = ScriptedLlm::new().then_respond("first").then_respond("second");
        assert_eq!(llm.complete("a").await.unwrap(), "first");
        assert_eq!(llm.complete("b").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let llm = ScriptedLlm::new().then_respond("only");
        let _ = llm.complete("a").await.unwrap();
        assert!(llm.complete("b").await.is_err());
    }

    #[tokio::test]
    async fn scripted_failure() {
        let llm = ScriptedLlm::new().then_fail(true).then_respond("recovered");
        let err = llm.complete("a").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(llm.complete("b").await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn records_prompts() {
        let llm = ScriptedLlm::new().then_respond("ok");
        let _ = llm.complete("the prompt").await.unwrap();
        assert_eq!(llm.calls(), vec!["the prompt".to_owned()]);
    }

    #[tokio::test]
    async fn usable_through_dyn_trait() {
        let llm: Box<dyn LlmClient> = Box::new(ScriptedLlm::new().then_respond("dyn"));
        assert_eq!(llm.complete("x").await.unwrap(), "dyn");
    }
}
