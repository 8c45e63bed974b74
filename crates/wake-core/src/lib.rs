//! # wake-core
//!
//! Shared kernel for the wake memory subsystem.
//!
//! - [`ids`] — branded UUID v7 newtypes for every entity
//! - [`messages`] — the immutable conversation message model
//! - [`errors`] — the [`WakeError`] taxonomy and domain sub-errors
//! - [`retry`] — portable backoff math (async execution lives in the engine)
//! - [`llm`] — the completion-provider contract consumed by the summarizer

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod llm;
pub mod messages;
pub mod retry;

pub use errors::{
    ConcurrencyConflict, ConsistencyViolation, PersistenceError, PersistenceOperation,
    ProviderError, ProviderKind, WakeError,
};
pub use ids::{ConversationId, MessageId, NodeId, OwnerId, RecordId, RunId};
pub use llm::{LlmClient, ScriptedLlm};
pub use messages::{Message, Role};
pub use retry::{RetryConfig, calculate_backoff_delay};
