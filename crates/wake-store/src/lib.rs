//! # wake-store
//!
//! The persistence and query façade for the memory subsystem.
//!
//! Owns the hierarchy: working context → recent messages → summaries →
//! vector-indexed history → journals. Structured records live in SQLite;
//! the vector index is a derived sibling table written in the same
//! transaction, so the two can never disagree about what exists.
//!
//! ## Hot context and compaction
//!
//! Each conversation has a *hot boundary*: messages at or after it are the
//! verbatim tail, everything before it is covered by summaries (or, after
//! a truncation fallback, by a flagged gap). [`MemoryStore::compact`]
//! replaces the oldest span of the tail with exactly one summary when the
//! hot context exceeds its token budget; the most recent turn is never
//! summarized.
//!
//! ## Concurrency
//!
//! - Appends are serialized per conversation through an async lock.
//! - Compaction and consolidation exclude each other through a
//!   per-conversation guard acquired with `try_lock` — background work
//!   skips and retries next cycle instead of waiting. The guard stays
//!   held across the summarizer call (that is the mutual exclusion), but
//!   it is never the append lock, so turns keep flowing.
//! - Neither the append lock nor the database mutex is held across a
//!   provider await: spans are snapshotted, summarized, and the span
//!   boundary is revalidated at commit.

#![deny(unsafe_code)]

pub mod compaction;
pub mod hot;
pub mod locks;
pub mod records;
pub mod schema;
pub mod store;

pub use compaction::CompactionOutcome;
pub use hot::HotContext;
pub use locks::LockMap;
pub use records::{
    MemoryRecord, RecordKind, RecordQuery, RetrievalPath, RetrievedRecord, Summary,
};
pub use store::{Conversation, MemoryStore, RebuildReport, UserProfile};
