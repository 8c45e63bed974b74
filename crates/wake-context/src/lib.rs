//! # wake-context
//!
//! Budget-aware context assembly.
//!
//! Given a new user turn, [`assembler::ContextAssembler`] decides what
//! combination of identity kernel, hot recent messages, semantically
//! retrieved records, and self-model facts goes into the next LLM call,
//! under a hard token budget. Assembly is a pure read: it never mutates
//! the memory store.
//!
//! Tier priority when the budget is tight: self-model facts are trimmed
//! first, retrieved records second, hot messages never — recent
//! conversational continuity always wins over retrieved long-term memory.

#![deny(unsafe_code)]

pub mod assembler;
pub mod blob;

pub use assembler::ContextAssembler;
pub use blob::{ContextBlob, SelfFact};
