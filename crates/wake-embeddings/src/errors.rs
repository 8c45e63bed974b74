//! Embedding error types.
//!
//! Embedding failures are never fatal to retrieval: the caller degrades to
//! keyword scoring over the structured corpus instead.

use thiserror::Error;

/// Errors from embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embedding service call failed (network, non-2xx status).
    #[error("embedding request failed: {0}")]
    Request(String),

    /// The embedding service call timed out.
    #[error("embedding request timed out after {0}ms")]
    Timeout(u64),

    /// The service returned a vector of unexpected dimensions.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    Dimensions {
        /// Configured dimensions.
        expected: usize,
        /// Dimensions actually returned or stored.
        actual: usize,
    },

    /// `SQLite` error (preserves source chain).
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Malformed service response.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbeddingError {
    /// Whether retrying may succeed (timeouts and transport failures).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Timeout(_))
    }
}

/// Result alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;
