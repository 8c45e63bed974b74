//! The consolidation job.
//!
//! One run per owner per window:
//!
//! 1. Heal compaction gaps in the owner's conversations (skipping any
//!    conversation currently being compacted — it will be retried next
//!    cycle).
//! 2. Regenerate daily journals for each day in the window that has
//!    material, wholesale (never merged).
//! 3. Review self-model coherence: contradictions and ungrounded claims
//!    are flagged in the run report and the log, never rejected — the
//!    check stays off the turn path.
//! 4. Commit the window boundary, making a re-run over the same window a
//!    no-op.
//!
//! The job is fail-silent: individual failures are logged and counted,
//! never propagated. The window boundary is only committed when the run
//! saw no conflicts, so skipped conversations get another chance.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use wake_core::errors::WakeError;
use wake_core::ids::OwnerId;
use wake_core::messages::Message;
use wake_selfmodel::GraphRepo;
use wake_store::{MemoryStore, RecordKind};
use wake_summarizer::Summarizer;

/// Result of one consolidation run for one owner.
#[derive(Clone, Debug, Default)]
pub struct ConsolidationReport {
    /// Window key for this run.
    pub window_key: String,
    /// The window was already committed; nothing was done.
    pub already_committed: bool,
    /// Journals written (regenerated) this run.
    pub journals_written: usize,
    /// Compaction gaps healed this run.
    pub gaps_consolidated: usize,
    /// Conversations skipped due to lock contention (retried next cycle).
    pub conflicts: usize,
    /// Non-conflict failures (logged, not fatal).
    pub failures: usize,
    /// Contradictory self-model claim pairs found by the coherence review.
    pub contradictions: usize,
    /// Active self-model claims with no grounding evidence.
    pub ungrounded_claims: usize,
}

/// Periodic consolidation over a trailing time window.
pub struct ConsolidationJob {
    store: Arc<MemoryStore>,
    summarizer: Arc<dyn Summarizer>,
    window_days: u32,
}

impl ConsolidationJob {
    /// Create a consolidation job.
    #[must_use]
    pub fn new(store: Arc<MemoryStore>, summarizer: Arc<dyn Summarizer>, window_days: u32) -> Self {
        Self {
            store,
            summarizer,
            window_days: window_days.max(1),
        }
    }

    /// Deterministic key for an owner's consolidation window.
    #[must_use]
    pub fn window_key(owner_id: &OwnerId, start: NaiveDate, end: NaiveDate) -> String {
        let digest = Sha256::digest(format!("{owner_id}:{start}:{end}").as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("consolidate-{start}-{end}-{hex}")
    }

    /// Run consolidation for one owner over the window ending at `today`.
    pub async fn run_for_owner(&self, owner_id: &OwnerId, today: NaiveDate) -> ConsolidationReport {
        let start = today - Duration::days(i64::from(self.window_days));
        let window_key = Self::window_key(owner_id, start, today);
        let mut report = ConsolidationReport {
            window_key: window_key.clone(),
            ..ConsolidationReport::default()
        };

        match self.store.consolidation_done(&window_key) {
            Ok(true) => {
                report.already_committed = true;
                info!(%owner_id, window_key, "window already consolidated; skipping");
                return report;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(%owner_id, error = %e, "could not read consolidation state");
                report.failures += 1;
                return report;
            }
        }

        self.heal_gaps(owner_id, &mut report).await;
        self.write_journals(owner_id, start, today, &mut report).await;
        self.review_coherence(owner_id, &mut report);

        // Only commit the boundary when nothing was skipped: a skipped
        // conversation must be retried by the next cycle.
        if report.conflicts == 0 {
            if let Err(e) = self.store.mark_consolidated(&window_key, owner_id) {
                warn!(%owner_id, error = %e, "failed to commit consolidation boundary");
                report.failures += 1;
            }
        }

        info!(
            %owner_id,
            window_key,
            journals = report.journals_written,
            gaps = report.gaps_consolidated,
            conflicts = report.conflicts,
            contradictions = report.contradictions,
            ungrounded = report.ungrounded_claims,
            "consolidation run complete"
        );
        report
    }

    /// Flag self-model incoherence found between sessions.
    ///
    /// Read-only: contradictions and ungrounded claims are reported, not
    /// resolved — resolving them is the agent's job, through the command
    /// interface.
    fn review_coherence(&self, owner_id: &OwnerId, report: &mut ConsolidationReport) {
        let graph = match self.store.with_connection(|conn| {
            GraphRepo::ensure_tables(conn)?;
            GraphRepo::load_graph(conn, owner_id)
        }) {
            Ok(graph) => graph,
            Err(e) => {
                warn!(%owner_id, error = %e, "could not load self-model graph");
                report.failures += 1;
                return;
            }
        };
        let contradictions = graph.find_contradictions();
        for (a, b) in &contradictions {
            warn!(%owner_id, node_a = %a, node_b = %b, "contradictory self-model claims");
        }
        report.contradictions = contradictions.len();
        report.ungrounded_claims = graph.ungrounded_claims().len();
        if report.ungrounded_claims > 0 {
            info!(
                %owner_id,
                count = report.ungrounded_claims,
                "self-model claims without grounding evidence"
            );
        }
    }

    async fn heal_gaps(&self, owner_id: &OwnerId, report: &mut ConsolidationReport) {
        let conversations = match self.store.list_conversations(owner_id) {
            Ok(c) => c,
            Err(e) => {
                warn!(%owner_id, error = %e, "could not list conversations");
                report.failures += 1;
                return;
            }
        };
        for conversation_id in conversations {
            match self
                .store
                .consolidate_gaps(&conversation_id, self.summarizer.as_ref())
                .await
            {
                Ok(n) => report.gaps_consolidated += n,
                Err(WakeError::Conflict(_)) => {
                    info!(
                        %conversation_id,
                        "conversation busy (mid-compaction); retrying next cycle"
                    );
                    report.conflicts += 1;
                }
                Err(e) => {
                    warn!(%conversation_id, error = %e, "gap consolidation failed");
                    report.failures += 1;
                }
            }
        }
    }

    async fn write_journals(
        &self,
        owner_id: &OwnerId,
        start: NaiveDate,
        end: NaiveDate,
        report: &mut ConsolidationReport,
    ) {
        let mut day = start;
        while day < end {
            let next = day + Duration::days(1);
            let from = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
            let to = Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0).unwrap());

            let material = match self.store.records_between(
                owner_id,
                from,
                to,
                &[RecordKind::Summary, RecordKind::Observation],
            ) {
                Ok(records) => records,
                Err(e) => {
                    warn!(%owner_id, %day, error = %e, "could not read window material");
                    report.failures += 1;
                    day = next;
                    continue;
                }
            };
            if material.is_empty() {
                day = next;
                continue;
            }

            // Feed the day's material to the summarizer as a synthetic
            // transcript; the journal is its thematic digest.
            let synthetic: Vec<Message> = material
                .iter()
                .map(|record| Message::system(record.text.clone()))
                .collect();
            match self.summarizer.summarize(&synthetic).await {
                Ok(body) => match self.store.write_journal(owner_id, day, &body).await {
                    Ok(_) => report.journals_written += 1,
                    Err(e) => {
                        warn!(%owner_id, %day, error = %e, "journal write failed");
                        report.failures += 1;
                    }
                },
                Err(e) => {
                    warn!(%owner_id, %day, error = %e, "journal summarization failed");
                    report.failures += 1;
                }
            }
            day = next;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wake_core::errors::Result;
    use wake_embeddings::service::HashEmbedder;
    use wake_settings::{MemorySettings, RetrievalSettings};
    use wake_store::{MemoryRecord, RecordQuery};

    struct StaticSummarizer {
        body: String,
        calls: AtomicUsize,
    }

    impl StaticSummarizer {
        fn new(body: &str) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_owned(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Summarizer for StaticSummarizer {
        async fn summarize(&self, messages: &[Message]) -> Result<String> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if messages.is_empty() {
                return Err(WakeError::invalid_input("empty span"));
            }
            Ok(self.body.clone())
        }
    }

    fn owner() -> OwnerId {
        OwnerId::from("owner-1")
    }

    fn make_store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::open_in_memory(
                Arc::new(HashEmbedder::new(64)),
                MemorySettings::default(),
                RetrievalSettings::default(),
            )
            .unwrap(),
        )
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
    }

    async fn seed_observation(store: &MemoryStore) {
        store
            .write_record(MemoryRecord::new(
                RecordKind::Observation,
                owner(),
                "the user planted tomatoes this week",
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_writes_journal_for_day_with_material() {
        let store = make_store();
        seed_observation(&store).await;
        let summarizer = StaticSummarizer::new("themes of the day: gardening");
        let job = ConsolidationJob::new(Arc::clone(&store), summarizer, 7);

        // Records are created "now"; use a window ending tomorrow so the
        // creation day falls inside [start, end).
        let end = Utc::now().date_naive() + Duration::days(1);
        let report = job.run_for_owner(&owner(), end).await;

        assert!(!report.already_committed);
        assert_eq!(report.journals_written, 1);
        assert_eq!(report.conflicts, 0);
        let journal_day = Utc::now().date_naive();
        assert_eq!(
            store.journal(&owner(), journal_day).unwrap().as_deref(),
            Some("themes of the day: gardening")
        );
    }

    #[tokio::test]
    async fn rerun_over_same_window_is_noop() {
        let store = make_store();
        seed_observation(&store).await;
        let summarizer = StaticSummarizer::new("digest");
        let job = ConsolidationJob::new(Arc::clone(&store), summarizer.clone(), 7);

        let end = Utc::now().date_naive() + Duration::days(1);
        let first = job.run_for_owner(&owner(), end).await;
        assert_eq!(first.journals_written, 1);
        let calls_after_first = summarizer.calls.load(Ordering::SeqCst);

        let second = job.run_for_owner(&owner(), end).await;
        assert!(second.already_committed);
        assert_eq!(second.journals_written, 0);
        assert_eq!(
            summarizer.calls.load(Ordering::SeqCst),
            calls_after_first,
            "no re-summarization on the second run"
        );

        // No duplicate journal records either.
        let journals = store
            .query_records(
                &RecordQuery::recent(owner(), 10).with_kinds(vec![RecordKind::Journal]),
            )
            .await
            .unwrap();
        assert_eq!(journals.len(), 1);
    }

    #[tokio::test]
    async fn empty_window_writes_nothing() {
        let store = make_store();
        let summarizer = StaticSummarizer::new("unused");
        let job = ConsolidationJob::new(Arc::clone(&store), summarizer.clone(), 7);

        let report = job.run_for_owner(&owner(), today()).await;
        assert_eq!(report.journals_written, 0);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn coherence_review_flags_contradictions_and_ungrounded_claims() {
        use wake_selfmodel::{Node, NodeType, SelfModelGraph};

        let store = make_store();
        let mut graph = SelfModelGraph::new();
        let _ = graph.add_node(Node::proposed(
            owner(),
            NodeType::Capability,
            "I can remember long conversations",
            0.8,
        ));
        let _ = graph.add_node(Node::proposed(
            owner(),
            NodeType::Capability,
            "I cannot remember long conversations",
            0.6,
        ));
        store.with_connection(|conn| {
            GraphRepo::ensure_tables(conn)?;
            GraphRepo::save_graph(conn, &owner(), &graph)
        })
        .unwrap();

        let job = ConsolidationJob::new(Arc::clone(&store), StaticSummarizer::new("digest"), 7);
        let report = job.run_for_owner(&owner(), today()).await;

        assert_eq!(report.contradictions, 1);
        assert_eq!(report.ungrounded_claims, 2, "both claims lack evidence");
        assert_eq!(report.failures, 0);
    }

    #[tokio::test]
    async fn window_keys_differ_by_owner_and_window() {
        let a = ConsolidationJob::window_key(&OwnerId::from("a"), today(), today());
        let b = ConsolidationJob::window_key(&OwnerId::from("b"), today(), today());
        let c = ConsolidationJob::window_key(
            &OwnerId::from("a"),
            today() - Duration::days(7),
            today(),
        );
        assert_ne!(a, b);
        assert_ne!(a, c);
        // Same inputs, same key — re-runs find the committed boundary.
        assert_eq!(
            a,
            ConsolidationJob::window_key(&OwnerId::from("a"), today(), today())
        );
    }

    #[tokio::test]
    async fn conflict_defers_boundary_commit_until_next_cycle() {
        // A conversation mid-compaction makes the job skip it and leave
        // the window boundary uncommitted; the next cycle finishes the job.
        let store = Arc::new(
            MemoryStore::open_in_memory(
                Arc::new(HashEmbedder::new(64)),
                MemorySettings {
                    max_hot_tokens: 200,
                    compaction_margin_tokens: 40,
                    preserve_tail_messages: 2,
                    ..MemorySettings::default()
                },
                RetrievalSettings::default(),
            )
            .unwrap(),
        );
        seed_observation(&store).await;
        let conv = store.create_conversation(&owner()).unwrap();
        for i in 0..30 {
            let _ = store
                .append_message(&conv.id, &Message::user(format!("padded message {i}")))
                .await
                .unwrap();
        }

        struct BlockingSummarizer {
            started: Arc<tokio::sync::Notify>,
            release: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl Summarizer for BlockingSummarizer {
            async fn summarize(&self, _messages: &[Message]) -> Result<String> {
                self.started.notify_one();
                self.release.notified().await;
                Ok("slow summary".to_owned())
            }
        }

        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let blocking = BlockingSummarizer {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        };
        let compact_store = Arc::clone(&store);
        let compact_conv = conv.id.clone();
        let compaction =
            tokio::spawn(async move { compact_store.compact(&compact_conv, &blocking).await });
        started.notified().await;

        // The conversation's work guard is now held mid-summarization.
        let job = ConsolidationJob::new(
            Arc::clone(&store),
            StaticSummarizer::new("digest"),
            7,
        );
        let end = Utc::now().date_naive() + Duration::days(1);
        let report = job.run_for_owner(&owner(), end).await;
        assert_eq!(report.conflicts, 1);
        assert!(
            !store.consolidation_done(&report.window_key).unwrap(),
            "boundary not committed while a conversation was skipped"
        );

        release.notify_one();
        let _ = compaction.await.unwrap().unwrap();

        let retry = job.run_for_owner(&owner(), end).await;
        assert_eq!(retry.conflicts, 0);
        assert!(store.consolidation_done(&retry.window_key).unwrap());
    }
}
