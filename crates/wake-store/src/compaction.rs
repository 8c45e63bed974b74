//! Threshold-driven compaction of the hot context.
//!
//! When the hot context exceeds its token budget, the oldest contiguous
//! span of tail messages is replaced by exactly one summary. The span is
//! chosen so the remaining hot context lands under the budget minus a
//! safety margin; span boundaries always align with message boundaries and
//! the most recent turn is never summarized.
//!
//! Failure ladder: a summarizer failure is retried once with half the
//! span; a second failure falls back to truncation — the span is dropped
//! from the hot tail without a summary and the gap is flagged for a later
//! consolidation pass. Turn delivery never blocks on summarization
//! succeeding.
//!
//! The per-conversation work guard makes concurrent compaction (or a
//! racing consolidation job) impossible, while appends stay unblocked: the
//! guard is not the append lock, and neither the append lock nor the
//! database mutex is held across the summarizer await.

use rusqlite::params;
use tracing::{info, warn};
use wake_core::errors::{
    ConcurrencyConflict, PersistenceError, PersistenceOperation, Result, WakeError,
};
use wake_core::ids::{ConversationId, RecordId};
use wake_core::messages::{Message, total_tokens};
use wake_summarizer::Summarizer;
use wake_tokens::estimator::estimate_body_tokens;

use crate::store::MemoryStore;

/// Outcome of a compaction call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Hot context already under budget (or nothing eligible): no-op,
    /// no summary produced.
    NotNeeded,
    /// A span was summarized and replaced in the hot tier.
    Compacted {
        /// ID of the produced summary (one per compaction call).
        summary_id: RecordId,
        /// First message sequence covered.
        start_seq: u64,
        /// Last message sequence covered.
        end_seq: u64,
        /// Hot-context tokens before compaction.
        tokens_before: u32,
        /// Hot-context tokens after compaction.
        tokens_after: u32,
    },
    /// Summarization failed twice; the span was dropped from the hot tier
    /// and flagged as a gap for consolidation.
    Truncated {
        /// First message sequence dropped.
        start_seq: u64,
        /// Last message sequence dropped.
        end_seq: u64,
    },
}

impl MemoryStore {
    /// Compact the conversation's hot context if it exceeds the budget.
    ///
    /// Produces at most one summary per call. Fails with
    /// [`ConcurrencyConflict`] if compaction or consolidation is already
    /// running for this conversation.
    pub async fn compact(
        &self,
        conversation_id: &ConversationId,
        summarizer: &dyn Summarizer,
    ) -> Result<CompactionOutcome> {
        let _guard = self
            .work_guards
            .try_acquire(conversation_id.as_str(), "compaction")?;

        // Snapshot under the guard; appends may continue but only add to
        // the tail end, which the chosen span never touches.
        let conversation = self.conversation(conversation_id)?.ok_or_else(|| {
            WakeError::invalid_input(format!("unknown conversation: {conversation_id}"))
        })?;
        let hot = self.hot_context(conversation_id)?;
        let tokens_before = hot.total_tokens();
        if tokens_before <= self.memory.max_hot_tokens {
            return Ok(CompactionOutcome::NotNeeded);
        }

        let preserve = self.memory.preserve_tail_messages.max(1);
        if hot.tail.len() <= preserve {
            // Everything in the tail is within the preserve window; there
            // is nothing eligible to summarize.
            return Ok(CompactionOutcome::NotNeeded);
        }
        let eligible = &hot.tail[..hot.tail.len() - preserve];

        let target = self
            .memory
            .max_hot_tokens
            .saturating_sub(self.memory.compaction_margin_tokens);
        let span_len = select_span(eligible, tokens_before, target);
        let span = &eligible[..span_len];
        let start_seq = conversation.hot_start_seq;

        // Summarize without holding the append lock or the database
        // mutex; retry once with half the span.
        let summarized = match summarizer.summarize(span).await {
            Ok(body) => Some((body, span_len)),
            Err(WakeError::InvalidInput(message)) => {
                return Err(WakeError::InvalidInput(message));
            }
            Err(first_error) => {
                let half_len = (span_len / 2).max(1);
                warn!(
                    conversation_id = %conversation_id,
                    error = %first_error,
                    span = span_len,
                    retry_span = half_len,
                    "summarizer failed; retrying with smaller span"
                );
                match summarizer.summarize(&eligible[..half_len]).await {
                    Ok(body) => Some((body, half_len)),
                    Err(second_error) => {
                        warn!(
                            conversation_id = %conversation_id,
                            error = %second_error,
                            "summarizer failed twice; truncating span"
                        );
                        None
                    }
                }
            }
        };

        match summarized {
            Some((body, len)) => {
                let end_seq = start_seq + len as u64 - 1;
                let span_tokens = total_tokens(&hot.tail[..len]);
                let summary_tokens = estimate_body_tokens(&body);
                let tokens_after = tokens_before - span_tokens + summary_tokens;

                // Embedding is best-effort; a missing vector is repaired by
                // the next rebuild pass.
                let embedding = match self.embedder.embed(&body).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(error = %e, "summary embedding failed; deferring to rebuild");
                        None
                    }
                };

                let summary_id = self.commit_summary(
                    conversation_id,
                    &conversation.owner_id,
                    start_seq,
                    end_seq,
                    &body,
                    summary_tokens,
                    embedding.as_deref(),
                )?;

                info!(
                    conversation_id = %conversation_id,
                    start_seq,
                    end_seq,
                    tokens_before,
                    tokens_after,
                    "compaction complete"
                );
                Ok(CompactionOutcome::Compacted {
                    summary_id,
                    start_seq,
                    end_seq,
                    tokens_before,
                    tokens_after,
                })
            }
            None => {
                let end_seq = start_seq + span_len as u64 - 1;
                self.commit_truncation(conversation_id, start_seq, end_seq)?;
                Ok(CompactionOutcome::Truncated { start_seq, end_seq })
            }
        }
    }

    #[allow(clippy::too_many_arguments, clippy::cast_possible_wrap)]
    fn commit_summary(
        &self,
        conversation_id: &ConversationId,
        owner_id: &wake_core::ids::OwnerId,
        start_seq: u64,
        end_seq: u64,
        body: &str,
        summary_tokens: u32,
        embedding: Option<&[f32]>,
    ) -> Result<RecordId> {
        let summary_id = RecordId::new();
        let created_at = chrono::Utc::now().to_rfc3339();

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| {
            WakeError::from(
                PersistenceError::new("summaries", PersistenceOperation::Write, e.to_string())
                    .with_source(e),
            )
        })?;

        // Revalidate the boundary: the work guard prevents concurrent
        // compaction, so a moved boundary means a logic error somewhere.
        let current_start: i64 = tx
            .query_row(
                "SELECT hot_start_seq FROM conversations WHERE id = ?1",
                params![conversation_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "conversations",
                    PersistenceOperation::Read,
                    e.to_string(),
                ))
            })?;
        #[allow(clippy::cast_sign_loss)]
        let current_start = current_start as u64;
        if current_start != start_seq {
            return Err(ConcurrencyConflict::new(
                conversation_id.as_str(),
                "hot boundary moved during compaction",
            )
            .into());
        }

        let _ = tx
            .execute(
                "INSERT INTO summaries
                 (id, conversation_id, start_seq, end_seq, body, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    summary_id.as_str(),
                    conversation_id.as_str(),
                    start_seq as i64,
                    end_seq as i64,
                    body,
                    i64::from(summary_tokens),
                    created_at
                ],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "summaries",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;

        let _ = tx
            .execute(
                "UPDATE conversations SET hot_start_seq = ?1 WHERE id = ?2",
                params![(end_seq + 1) as i64, conversation_id.as_str()],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "conversations",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;

        let metadata = serde_json::json!({
            "conversationId": conversation_id.as_str(),
            "startSeq": start_seq,
            "endSeq": end_seq,
        });
        let _ = tx
            .execute(
                "INSERT OR REPLACE INTO memory_records (id, kind, text, owner_id, created_at, metadata)
                 VALUES (?1, 'summary', ?2, ?3, ?4, ?5)",
                params![
                    summary_id.as_str(),
                    body,
                    owner_id.as_str(),
                    created_at,
                    metadata.to_string()
                ],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "memory_records",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;
        if let Some(embedding) = embedding {
            self.vectors
                .store(
                    &tx,
                    summary_id.as_str(),
                    owner_id.as_str(),
                    "summary",
                    &created_at,
                    embedding,
                )
                .map_err(|e| {
                    WakeError::from(PersistenceError::new(
                        "memory_vectors",
                        PersistenceOperation::Write,
                        e.to_string(),
                    ))
                })?;
        }

        tx.commit().map_err(|e| {
            WakeError::from(PersistenceError::new(
                "summaries",
                PersistenceOperation::Write,
                e.to_string(),
            ))
        })?;
        Ok(summary_id)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn commit_truncation(
        &self,
        conversation_id: &ConversationId,
        start_seq: u64,
        end_seq: u64,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| {
            WakeError::from(PersistenceError::new(
                "compaction_gaps",
                PersistenceOperation::Write,
                e.to_string(),
            ))
        })?;
        let _ = tx
            .execute(
                "INSERT INTO compaction_gaps (conversation_id, start_seq, end_seq, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    conversation_id.as_str(),
                    start_seq as i64,
                    end_seq as i64,
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "compaction_gaps",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;
        let _ = tx
            .execute(
                "UPDATE conversations SET hot_start_seq = ?1 WHERE id = ?2",
                params![(end_seq + 1) as i64, conversation_id.as_str()],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "conversations",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;
        tx.commit().map_err(|e| {
            WakeError::from(PersistenceError::new(
                "compaction_gaps",
                PersistenceOperation::Write,
                e.to_string(),
            ))
        })?;
        Ok(())
    }
}

impl MemoryStore {
    /// Summarize gaps flagged by truncation fallback, restoring the
    /// summary partition over their message ranges.
    ///
    /// Takes the same per-conversation work guard as compaction, so a
    /// consolidation pass that finds the conversation mid-compaction gets
    /// a [`ConcurrencyConflict`] and retries next cycle. Returns the
    /// number of gaps consolidated; a gap whose summarization fails is
    /// left flagged for the next pass.
    pub async fn consolidate_gaps(
        &self,
        conversation_id: &ConversationId,
        summarizer: &dyn Summarizer,
    ) -> Result<usize> {
        let _guard = self
            .work_guards
            .try_acquire(conversation_id.as_str(), "gap consolidation")?;

        let conversation = self.conversation(conversation_id)?.ok_or_else(|| {
            WakeError::invalid_input(format!("unknown conversation: {conversation_id}"))
        })?;

        let gaps = self.unconsolidated_gaps(conversation_id)?;
        let mut consolidated = 0_usize;
        for (start_seq, end_seq) in gaps {
            let span = self.message_span(conversation_id, start_seq, end_seq)?;
            if span.is_empty() {
                self.mark_gap_consolidated(conversation_id, start_seq, end_seq)?;
                continue;
            }
            match summarizer.summarize(&span).await {
                Ok(body) => {
                    let summary_tokens = estimate_body_tokens(&body);
                    let embedding = self.embedder.embed(&body).await.ok();
                    self.commit_gap_summary(
                        conversation_id,
                        &conversation.owner_id,
                        start_seq,
                        end_seq,
                        &body,
                        summary_tokens,
                        embedding.as_deref(),
                    )?;
                    consolidated += 1;
                }
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        start_seq,
                        end_seq,
                        error = %e,
                        "gap summarization failed; leaving flagged"
                    );
                }
            }
        }
        Ok(consolidated)
    }

    #[allow(clippy::cast_sign_loss)]
    fn unconsolidated_gaps(&self, conversation_id: &ConversationId) -> Result<Vec<(u64, u64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT start_seq, end_seq FROM compaction_gaps
                 WHERE conversation_id = ?1 AND consolidated = 0 ORDER BY start_seq",
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "compaction_gaps",
                    PersistenceOperation::Read,
                    e.to_string(),
                ))
            })?;
        let rows = stmt
            .query_map(params![conversation_id.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "compaction_gaps",
                    PersistenceOperation::Read,
                    e.to_string(),
                ))
            })?
            .filter_map(std::result::Result::ok)
            .map(|(s, e)| (s as u64, e as u64))
            .collect();
        Ok(rows)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn mark_gap_consolidated(
        &self,
        conversation_id: &ConversationId,
        start_seq: u64,
        end_seq: u64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let _ = conn
            .execute(
                "UPDATE compaction_gaps SET consolidated = 1
                 WHERE conversation_id = ?1 AND start_seq = ?2 AND end_seq = ?3",
                params![conversation_id.as_str(), start_seq as i64, end_seq as i64],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "compaction_gaps",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments, clippy::cast_possible_wrap)]
    fn commit_gap_summary(
        &self,
        conversation_id: &ConversationId,
        owner_id: &wake_core::ids::OwnerId,
        start_seq: u64,
        end_seq: u64,
        body: &str,
        summary_tokens: u32,
        embedding: Option<&[f32]>,
    ) -> Result<()> {
        let summary_id = RecordId::new();
        let created_at = chrono::Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| {
            WakeError::from(PersistenceError::new(
                "summaries",
                PersistenceOperation::Write,
                e.to_string(),
            ))
        })?;

        let _ = tx
            .execute(
                "INSERT INTO summaries
                 (id, conversation_id, start_seq, end_seq, body, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    summary_id.as_str(),
                    conversation_id.as_str(),
                    start_seq as i64,
                    end_seq as i64,
                    body,
                    i64::from(summary_tokens),
                    created_at
                ],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "summaries",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;
        let _ = tx
            .execute(
                "UPDATE compaction_gaps SET consolidated = 1
                 WHERE conversation_id = ?1 AND start_seq = ?2 AND end_seq = ?3",
                params![conversation_id.as_str(), start_seq as i64, end_seq as i64],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "compaction_gaps",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;
        let metadata = serde_json::json!({
            "conversationId": conversation_id.as_str(),
            "startSeq": start_seq,
            "endSeq": end_seq,
            "consolidatedGap": true,
        });
        let _ = tx
            .execute(
                "INSERT OR REPLACE INTO memory_records (id, kind, text, owner_id, created_at, metadata)
                 VALUES (?1, 'summary', ?2, ?3, ?4, ?5)",
                params![
                    summary_id.as_str(),
                    body,
                    owner_id.as_str(),
                    created_at,
                    metadata.to_string()
                ],
            )
            .map_err(|e| {
                WakeError::from(PersistenceError::new(
                    "memory_records",
                    PersistenceOperation::Write,
                    e.to_string(),
                ))
            })?;
        if let Some(embedding) = embedding {
            self.vectors
                .store(
                    &tx,
                    summary_id.as_str(),
                    owner_id.as_str(),
                    "summary",
                    &created_at,
                    embedding,
                )
                .map_err(|e| {
                    WakeError::from(PersistenceError::new(
                        "memory_vectors",
                        PersistenceOperation::Write,
                        e.to_string(),
                    ))
                })?;
        }
        tx.commit().map_err(|e| {
            WakeError::from(PersistenceError::new(
                "summaries",
                PersistenceOperation::Write,
                e.to_string(),
            ))
        })?;
        Ok(())
    }
}

/// Number of eligible messages (from the oldest) to summarize so the
/// remaining hot context lands at or under `target` tokens.
///
/// Always selects at least one message; never selects beyond `eligible`.
fn select_span(eligible: &[Message], hot_tokens: u32, target: u32) -> usize {
    let mut removed = 0_u32;
    let mut count = 0_usize;
    for message in eligible {
        if count > 0 && hot_tokens - removed <= target {
            break;
        }
        removed += message.token_count;
        count += 1;
    }
    count.max(1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
