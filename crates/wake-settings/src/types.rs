//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only overrides the fields it names. Each type implements
//! [`Default`] with production default values.

use serde::{Deserialize, Serialize};

/// Root settings type for the wake memory subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WakeSettings {
    /// Settings schema version.
    pub version: String,
    /// Memory store and compaction settings.
    pub memory: MemorySettings,
    /// Context assembly budgets.
    pub context: ContextSettings,
    /// Semantic retrieval settings.
    pub retrieval: RetrievalSettings,
    /// Embedding service settings.
    pub embedding: EmbeddingSettings,
    /// Summarizer settings.
    pub summarizer: SummarizerSettings,
    /// Background job settings.
    pub jobs: JobSettings,
    /// Retry policy for transient provider failures.
    pub retry: RetrySettings,
}

impl Default for WakeSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_owned(),
            memory: MemorySettings::default(),
            context: ContextSettings::default(),
            retrieval: RetrievalSettings::default(),
            embedding: EmbeddingSettings::default(),
            summarizer: SummarizerSettings::default(),
            jobs: JobSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

/// Memory store and compaction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    /// Path to the SQLite database file.
    pub db_path: String,
    /// Maximum tokens in the hot context before compaction fires.
    pub max_hot_tokens: u32,
    /// Safety margin below the threshold that compaction aims for.
    pub compaction_margin_tokens: u32,
    /// Messages at the tail that are never summarized (the most recent
    /// turn must always stay verbatim).
    pub preserve_tail_messages: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            db_path: "~/.wake/memory.db".to_owned(),
            max_hot_tokens: 8_000,
            compaction_margin_tokens: 1_000,
            preserve_tail_messages: 2,
        }
    }
}

/// Context assembly budgets.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Total token budget for an assembled context.
    pub max_context_tokens: u32,
    /// Reserved tokens for retrieved summaries/observations (tier 3).
    pub retrieved_reserve_tokens: u32,
    /// Reserved tokens for self-model facts (tier 4).
    pub self_model_reserve_tokens: u32,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_context_tokens: 12_000,
            retrieved_reserve_tokens: 2_000,
            self_model_reserve_tokens: 1_000,
        }
    }
}

/// Semantic retrieval settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalSettings {
    /// Top-K results returned by a semantic query.
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

/// Embedding service settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSettings {
    /// Embedding service endpoint URL.
    pub endpoint: String,
    /// Model identifier passed to the service.
    pub model: String,
    /// Embedding vector dimensions.
    pub dimensions: usize,
    /// Request timeout in milliseconds (embedding calls are short).
    pub timeout_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8630/v1/embed".to_owned(),
            model: "nomic-embed-text-v1.5".to_owned(),
            dimensions: 512,
            timeout_ms: 3_000,
        }
    }
}

/// Summarizer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummarizerSettings {
    /// Timeout for a summarization LLM call in milliseconds.
    pub timeout_ms: u64,
    /// Maximum serialized character length for the transcript.
    pub max_transcript_chars: usize,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_transcript_chars: 150_000,
        }
    }
}

/// Background job settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSettings {
    /// Seconds between consolidation cycles.
    pub consolidation_interval_secs: u64,
    /// Days covered by one consolidation window.
    pub window_days: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            consolidation_interval_secs: 3_600,
            window_days: 7,
        }
    }
}

/// Retry policy for transient provider failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Maximum retry attempts.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}
