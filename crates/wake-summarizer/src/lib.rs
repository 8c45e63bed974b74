//! # wake-summarizer
//!
//! Lossy compression of a message span into a compact summary.
//!
//! A summary is a compression, not a transcript: phrasing may be lost, but
//! facts that later retrieval might need may not. The prompt pins down what
//! must survive — named entities, stated preferences and decisions, open
//! questions, emotionally salient turning points — and requires numeric,
//! date, and identifier content to be copied verbatim.
//!
//! Failure contract: empty input is the caller's bug (`InvalidInput`);
//! timeouts and empty model output are provider failures, which the caller
//! answers by retrying once with a smaller span and then falling back to
//! truncation. Summarization failing must never block turn delivery.

#![deny(unsafe_code)]

pub mod summarizer;
pub mod transcript;

pub use summarizer::{LlmSummarizer, Summarizer};
pub use transcript::serialize_transcript;
