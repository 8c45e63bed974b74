//! The background job scheduler.
//!
//! The scheduler owns an explicit session record: at most one background
//! session (consolidation, reflection, ...) is active at a time, and the
//! start/stop transitions are guarded — there is no ambient "current
//! session" global. Turn processing never goes through the scheduler;
//! background work always yields to it at the per-conversation guards.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wake_core::errors::{ConcurrencyConflict, Result, WakeError};
use wake_core::ids::{OwnerId, RunId};

use crate::consolidation::ConsolidationJob;

/// An active background session.
#[derive(Clone, Debug)]
pub struct JobSession {
    /// Unique run ID.
    pub run_id: RunId,
    /// What kind of work the session performs.
    pub kind: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
}

/// Periodic scheduler for consolidation runs.
pub struct JobScheduler {
    job: Arc<ConsolidationJob>,
    interval: Duration,
    session: Arc<Mutex<Option<JobSession>>>,
    running: Arc<AtomicBool>,
}

impl JobScheduler {
    /// Create a scheduler running `job` every `interval`.
    #[must_use]
    pub fn new(job: Arc<ConsolidationJob>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            session: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The currently active session, if any.
    #[must_use]
    pub fn session(&self) -> Option<JobSession> {
        self.session.lock().clone()
    }

    /// Begin a background session.
    ///
    /// Fails with [`ConcurrencyConflict`] if a session is already active —
    /// one session at a time, enforced by state, not convention.
    pub fn start_session(&self, kind: &str) -> Result<RunId> {
        let mut session = self.session.lock();
        if let Some(active) = session.as_ref() {
            return Err(ConcurrencyConflict::new(
                "scheduler",
                format!("session {} ({}) already active", active.run_id, active.kind),
            )
            .into());
        }
        let run_id = RunId::new();
        *session = Some(JobSession {
            run_id: run_id.clone(),
            kind: kind.to_owned(),
            started_at: Utc::now(),
        });
        Ok(run_id)
    }

    /// End the active session.
    ///
    /// The `run_id` must match the active session — a stale holder cannot
    /// end someone else's session.
    pub fn end_session(&self, run_id: &RunId) -> Result<()> {
        let mut session = self.session.lock();
        match session.as_ref() {
            Some(active) if active.run_id == *run_id => {
                *session = None;
                Ok(())
            }
            Some(_) => Err(WakeError::invalid_input(
                "run ID does not match the active session",
            )),
            None => Err(WakeError::invalid_input("no active session")),
        }
    }

    /// Spawn the periodic loop for the given owners.
    ///
    /// Each cycle runs one consolidation session over all owners. A cycle
    /// that cannot start a session (another session active) skips and
    /// retries next tick. Run failures are recorded in the report and do
    /// not halt subsequent cycles.
    pub fn spawn(&self, owners: Vec<OwnerId>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let job = Arc::clone(&self.job);
        let session = Arc::clone(&self.session);
        let running = Arc::clone(&self.running);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh
            // scheduler waits a full interval before its first run.
            let _ = ticker.tick().await;

            while running.load(Ordering::SeqCst) {
                let _ = ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                {
                    let mut guard = session.lock();
                    if guard.is_some() {
                        warn!("previous session still active; skipping cycle");
                        continue;
                    }
                    *guard = Some(JobSession {
                        run_id: RunId::new(),
                        kind: "consolidation".to_owned(),
                        started_at: Utc::now(),
                    });
                }

                let today = Utc::now().date_naive();
                for owner in &owners {
                    let report = job.run_for_owner(owner, today).await;
                    if report.failures > 0 || report.conflicts > 0 {
                        info!(
                            %owner,
                            conflicts = report.conflicts,
                            failures = report.failures,
                            "consolidation cycle finished with deferred work"
                        );
                    }
                }

                *session.lock() = None;
            }
        })
    }

    /// Ask the periodic loop to stop after its current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
