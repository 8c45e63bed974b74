//! Error hierarchy for the memory subsystem.
//!
//! The taxonomy drives propagation policy:
//!
//! - [`WakeError::InvalidInput`] — rejected synchronously, never retried.
//! - [`WakeError::Provider`] — embedding/LLM failures; retried once with
//!   backoff when retryable, then degraded (keyword fallback, truncation).
//! - [`WakeError::Consistency`] — vector/structured mismatch found at read
//!   time; the structured store wins and the record is queued for repair.
//! - [`WakeError::Conflict`] — lock contention; background jobs back off,
//!   turn processing never does.
//! - [`WakeError::Persistence`] — database failures with table and
//!   operation context.
//!
//! User-facing turn delivery must never fail on any of these — callers
//! degrade to a smaller context instead of propagating.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// WakeError — top-level enum
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for the wake memory subsystem.
#[derive(Debug, Error)]
pub enum WakeError {
    /// Malformed caller input (empty span, bad filter). Caller's bug.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// External provider failure (embedding service, summarization LLM).
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// Database / storage error.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// Vector index and structured store disagree.
    #[error("{0}")]
    Consistency(#[from] ConsistencyViolation),

    /// Lock contention on a conversation.
    #[error("{0}")]
    Conflict(#[from] ConcurrencyConflict),
}

impl WakeError {
    /// Create an invalid-input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether a retry with backoff may succeed.
    ///
    /// Only transient provider failures are retryable; everything else is
    /// either the caller's fault or handled by a dedicated recovery path.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.retryable,
            Self::InvalidInput(_)
            | Self::Persistence(_)
            | Self::Consistency(_)
            | Self::Conflict(_) => false,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Provider(e) => &e.code,
            Self::Persistence(e) => &e.code,
            Self::Consistency(_) => "CONSISTENCY_VIOLATION",
            Self::Conflict(_) => "CONCURRENCY_CONFLICT",
        }
    }
}

/// Result alias for memory-subsystem operations.
pub type Result<T> = std::result::Result<T, WakeError>;

// ─────────────────────────────────────────────────────────────────────────────
// ProviderError
// ─────────────────────────────────────────────────────────────────────────────

/// Which external provider failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Embedding service.
    Embedding,
    /// Completion (summarization) LLM.
    Completion,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Completion => write!(f, "completion"),
        }
    }
}

/// External provider failure with retry context.
#[derive(Debug, Error)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    /// Which provider failed.
    pub kind: ProviderKind,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code.
    pub code: String,
    /// HTTP status, if the failure came from an HTTP call.
    pub status_code: Option<u16>,
    /// Whether retrying with backoff may succeed.
    pub retryable: bool,
    /// Original cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Create a new provider error (non-retryable by default).
    #[must_use]
    pub fn new(kind: ProviderKind, message: impl Into<String>) -> Self {
        let kind_upper = kind.to_string().to_uppercase();
        Self {
            kind,
            message: message.into(),
            code: format!("PROVIDER_{kind_upper}_ERROR"),
            status_code: None,
            retryable: false,
            source: None,
        }
    }

    /// Create a timeout error (always retryable).
    #[must_use]
    pub fn timeout(kind: ProviderKind, elapsed_ms: u64) -> Self {
        Self::new(kind, format!("timed out after {elapsed_ms}ms")).with_retryable(true)
    }

    /// Set the HTTP status code and infer retryability (429 and 5xx retry).
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self.retryable = status == 429 || status >= 500;
        self
    }

    /// Set the retryable flag explicitly.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Set the error cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PersistenceError
// ─────────────────────────────────────────────────────────────────────────────

/// Database operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceOperation {
    /// Reading from the store.
    Read,
    /// Writing to the store.
    Write,
    /// Deleting from the store.
    Delete,
    /// Querying the store.
    Query,
}

impl fmt::Display for PersistenceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Delete => write!(f, "delete"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// Database / storage persistence error.
#[derive(Debug, Error)]
#[error("persistence {operation} failed on {table}: {message}")]
pub struct PersistenceError {
    /// Table or store that failed.
    pub table: String,
    /// Operation that failed.
    pub operation: PersistenceOperation,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable error code.
    pub code: String,
    /// Original cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PersistenceError {
    /// Create a new persistence error.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        operation: PersistenceOperation,
        message: impl Into<String>,
    ) -> Self {
        let op_upper = operation.to_string().to_uppercase();
        Self {
            table: table.into(),
            operation,
            message: message.into(),
            code: format!("PERSISTENCE_{op_upper}_ERROR"),
            source: None,
        }
    }

    /// Set the error cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConsistencyViolation
// ─────────────────────────────────────────────────────────────────────────────

/// Vector index and structured store disagree about a record.
///
/// The structured store is authoritative; the holder of this error is
/// expected to drop the stale vector entry and queue a re-embed.
#[derive(Debug, Error)]
#[error("consistency violation on record {record_id}: {detail}")]
pub struct ConsistencyViolation {
    /// Record the two sides disagree about.
    pub record_id: String,
    /// What was observed.
    pub detail: String,
}

impl ConsistencyViolation {
    /// Create a new consistency violation.
    #[must_use]
    pub fn new(record_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            detail: detail.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConcurrencyConflict
// ─────────────────────────────────────────────────────────────────────────────

/// Lock contention on a shared resource.
///
/// Background jobs treat this as "skip and retry next cycle"; turn
/// processing never receives it because turns always win lock priority.
#[derive(Debug, Error)]
#[error("concurrency conflict on {resource}: {detail}")]
pub struct ConcurrencyConflict {
    /// Contended resource (usually a conversation ID).
    pub resource: String,
    /// What was being attempted.
    pub detail: String,
}

impl ConcurrencyConflict {
    /// Create a new concurrency conflict.
    #[must_use]
    pub fn new(resource: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            detail: detail.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // -- WakeError --

    #[test]
    fn invalid_input_not_retryable() {
        let err = WakeError::invalid_input("empty span");
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(err.to_string().contains("empty span"));
    }

    #[test]
    fn provider_timeout_is_retryable() {
        let err = WakeError::from(ProviderError::timeout(ProviderKind::Embedding, 3000));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("3000ms"));
    }

    #[test]
    fn conflict_not_retryable_inline() {
        // Conflicts are handled by skip-and-retry-next-cycle, not inline retry
        let err = WakeError::from(ConcurrencyConflict::new("conv-1", "compaction in progress"));
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "CONCURRENCY_CONFLICT");
    }

    #[test]
    fn consistency_code() {
        let err = WakeError::from(ConsistencyViolation::new("rec-1", "vector without row"));
        assert_eq!(err.code(), "CONSISTENCY_VIOLATION");
        assert!(!err.is_retryable());
    }

    // -- ProviderError --

    #[test]
    fn provider_error_basic() {
        let err = ProviderError::new(ProviderKind::Embedding, "connection refused");
        assert_eq!(err.code, "PROVIDER_EMBEDDING_ERROR");
        assert!(!err.retryable);
    }

    #[test]
    fn provider_error_429_retryable() {
        let err = ProviderError::new(ProviderKind::Completion, "rate limited").with_status(429);
        assert!(err.retryable);
        assert_eq!(err.status_code, Some(429));
    }

    #[test]
    fn provider_error_500_retryable() {
        let err = ProviderError::new(ProviderKind::Embedding, "server error").with_status(500);
        assert!(err.retryable);
    }

    #[test]
    fn provider_error_400_not_retryable() {
        let err = ProviderError::new(ProviderKind::Embedding, "bad request").with_status(400);
        assert!(!err.retryable);
    }

    #[test]
    fn provider_error_with_source() {
        let cause = std::io::Error::other("socket closed");
        let err =
            ProviderError::new(ProviderKind::Completion, "request failed").with_source(cause);
        assert!(err.source.is_some());
    }

    #[test]
    fn provider_kind_display() {
        assert_eq!(ProviderKind::Embedding.to_string(), "embedding");
        assert_eq!(ProviderKind::Completion.to_string(), "completion");
    }

    // -- PersistenceError --

    #[test]
    fn persistence_error_write() {
        let err = PersistenceError::new("messages", PersistenceOperation::Write, "disk full");
        assert_eq!(err.code, "PERSISTENCE_WRITE_ERROR");
        assert!(err.to_string().contains("messages"));
    }

    #[test]
    fn persistence_error_with_source() {
        let cause = std::io::Error::other("database locked");
        let err = PersistenceError::new("summaries", PersistenceOperation::Read, "locked")
            .with_source(cause);
        assert!(err.source.is_some());
    }

    #[test]
    fn persistence_operation_display() {
        assert_eq!(PersistenceOperation::Read.to_string(), "read");
        assert_eq!(PersistenceOperation::Write.to_string(), "write");
        assert_eq!(PersistenceOperation::Delete.to_string(), "delete");
        assert_eq!(PersistenceOperation::Query.to_string(), "query");
    }

    // -- conversions --

    #[test]
    fn from_persistence() {
        let err: WakeError =
            PersistenceError::new("journals", PersistenceOperation::Delete, "busy").into();
        assert_matches!(err, WakeError::Persistence(_));
        assert_eq!(err.code(), "PERSISTENCE_DELETE_ERROR");
    }

    #[test]
    fn from_provider() {
        let err: WakeError = ProviderError::new(ProviderKind::Embedding, "down").into();
        assert_matches!(err, WakeError::Provider(_));
    }

    // -- std::error::Error impls --

    #[test]
    fn errors_are_std_error() {
        let _: &dyn std::error::Error = &WakeError::invalid_input("x");
        let _: &dyn std::error::Error = &ProviderError::new(ProviderKind::Embedding, "x");
        let _: &dyn std::error::Error =
            &PersistenceError::new("t", PersistenceOperation::Read, "x");
        let _: &dyn std::error::Error = &ConsistencyViolation::new("r", "x");
        let _: &dyn std::error::Error = &ConcurrencyConflict::new("r", "x");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WakeError>();
    }
}
