//! Per-conversation lock maps.
//!
//! Two separate maps guard a conversation:
//!
//! - the **append lock** serializes message appends (turn processing awaits
//!   it; holds are short and never span a provider call);
//! - the **work guard** makes compaction and consolidation mutually
//!   exclusive. It is only ever `try`-acquired: whoever loses backs off
//!   (consolidation retries next cycle) instead of queueing behind a
//!   potentially slow summarization.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use wake_core::errors::{ConcurrencyConflict, Result};

/// A keyed map of async locks.
#[derive(Debug, Default)]
pub struct LockMap {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl LockMap {
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        self.inner
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key`, waiting if necessary.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Try to acquire the lock for `key` without waiting.
    ///
    /// Fails with [`ConcurrencyConflict`] when the lock is held; the caller
    /// decides whether that means "skip and retry next cycle" (background
    /// jobs) or "someone else is already doing this work" (compaction).
    pub fn try_acquire(&self, key: &str, detail: &str) -> Result<OwnedMutexGuard<()>> {
        self.entry(key)
            .try_lock_owned()
            .map_err(|_| ConcurrencyConflict::new(key, detail).into())
    }
}
