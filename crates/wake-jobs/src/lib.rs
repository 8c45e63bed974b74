//! # wake-jobs
//!
//! Periodic background work: consolidation and journal generation.
//!
//! Consolidation re-processes a time window of recent material into
//! coarser artifacts — daily journals, healed compaction gaps — reviews
//! self-model coherence, and commits the window boundary so a re-run over
//! the same window is a no-op rather than a duplicate.
//!
//! Background work never competes with turn processing: conversation
//! guards are try-acquired, and contention means skip-and-retry-next-cycle.
//! Run failures are logged and do not halt subsequent runs.

#![deny(unsafe_code)]

pub mod consolidation;
pub mod scheduler;

pub use consolidation::{ConsolidationJob, ConsolidationReport};
pub use scheduler::{JobScheduler, JobSession};
