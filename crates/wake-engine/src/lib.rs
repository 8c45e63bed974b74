//! # wake-engine
//!
//! The façade over the memory subsystem. Collaborators (chat handler,
//! tool handlers, journaling UI) talk to [`Engine`] and never see the
//! internal tier structure:
//!
//! - `append_message`, `get_hot_context`, `query_records`, `assemble` —
//!   the stable API surface
//! - [`commands::MemoryCommand`] — the closed, typed command set replacing
//!   free-form tool invocation, dispatched through a single entry point
//! - turn coordination — appends strictly serialized per conversation,
//!   superseded in-flight work discarded (last-write-wins)
//! - post-turn maintenance — compaction with a retry-once-with-backoff
//!   summarizer wrapper; memory degradation never fails a turn

#![deny(unsafe_code)]

pub mod commands;
pub mod engine;
pub mod retry;
pub mod turns;

pub use commands::{CommandOutcome, MemoryCommand};
pub use engine::Engine;
pub use retry::{RetryingSummarizer, with_retry};
pub use turns::{TurnOutcome, TurnTicket};
