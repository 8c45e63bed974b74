//! The context assembler.
//!
//! Budget allocation across four tiers, in priority order:
//!
//! 1. **Identity kernel** — identity-core nodes, a fixed small cost.
//! 2. **Hot messages** — as much of the hot context as fits after
//!    reserving room for tiers 3–4, newest first.
//! 3. **Retrieved records** — top-k summaries/observations semantically
//!    relevant to the new turn.
//! 4. **Self-model facts** — highest-confidence active claims.
//!
//! If the selected tiers together still exceed the budget, tier 4 is
//! trimmed first (lowest confidence out first), then tier 3 (lowest score
//! first), never tier 2.

use std::sync::Arc;

use tracing::{debug, warn};
use wake_core::errors::Result;
use wake_core::ids::ConversationId;
use wake_core::messages::Message;
use wake_selfmodel::{NodeFilter, NodeType, SelfModelGraph};
use wake_settings::ContextSettings;
use wake_store::{MemoryStore, RecordKind, RecordQuery};
use wake_tokens::TokenBudget;
use wake_tokens::estimator::estimate_body_tokens;

use crate::blob::{ContextBlob, SelfFact};

/// Assembles the per-turn context under a token budget.
///
/// Pure read: assembly never mutates the memory store.
pub struct ContextAssembler {
    store: Arc<MemoryStore>,
    settings: ContextSettings,
    top_k: usize,
}

impl ContextAssembler {
    /// Create an assembler over the given store.
    #[must_use]
    pub fn new(store: Arc<MemoryStore>, settings: ContextSettings, top_k: usize) -> Self {
        Self {
            store,
            settings,
            top_k,
        }
    }

    /// Assemble the context for a new user turn.
    ///
    /// The self-model graph is passed in by the caller (the engine owns
    /// loading it), which keeps this a pure function of its inputs.
    pub async fn assemble(
        &self,
        graph: &SelfModelGraph,
        conversation_id: &ConversationId,
        new_user_turn: &str,
    ) -> Result<ContextBlob> {
        let mut budget = TokenBudget::new(self.settings.max_context_tokens);

        // ── Tier 1: identity kernel ─────────────────────────────────────
        let kernel = self.build_kernel(graph, &mut budget);

        // ── Tier 2: hot messages, newest first, within the remainder
        //    after reserving for tiers 3–4 ─────────────────────────────
        let reserve = self
            .settings
            .retrieved_reserve_tokens
            .saturating_add(self.settings.self_model_reserve_tokens);
        let tier2_cap = budget.remaining().saturating_sub(reserve);
        let hot_messages = self.build_hot_tier(conversation_id, tier2_cap)?;
        let hot_tokens: u32 = hot_messages.iter().map(|m| m.token_count).sum();
        let _ = budget.charge(hot_tokens);

        // ── Tier 3: retrieved records ───────────────────────────────────
        let owner = self
            .store
            .conversation(conversation_id)?
            .map(|c| c.owner_id)
            .ok_or_else(|| {
                wake_core::errors::WakeError::invalid_input(format!(
                    "unknown conversation: {conversation_id}"
                ))
            })?;
        let query = RecordQuery::semantic(owner, new_user_turn, self.top_k)
            .with_kinds(vec![RecordKind::Summary, RecordKind::Observation]);
        // Retrieval failing must not fail the turn: assemble with an empty
        // tier 3 instead.
        let mut retrieved = match self.store.query_records(&query).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "retrieval failed; assembling without retrieved records");
                Vec::new()
            }
        };

        // ── Tier 4: self-model facts, highest confidence first ──────────
        let mut self_facts = build_self_facts(graph);

        // ── Enforce the budget: trim tier 4 first, then tier 3 ─────────
        let mut retrieved_tokens: u32 = retrieved
            .iter()
            .map(|r| estimate_body_tokens(&r.record.text))
            .sum();
        let mut fact_tokens: u32 = self_facts.iter().map(|f| f.tokens).sum();

        while fact_tokens > 0 && !budget.fits(retrieved_tokens + fact_tokens) {
            // Lowest confidence leaves first.
            if let Some(dropped) = self_facts.pop() {
                fact_tokens -= dropped.tokens;
            }
        }
        while retrieved_tokens > 0 && !budget.fits(retrieved_tokens + fact_tokens) {
            // Lowest score leaves first.
            if let Some(dropped) = retrieved.pop() {
                retrieved_tokens -= estimate_body_tokens(&dropped.record.text);
            }
        }
        let _ = budget.charge(retrieved_tokens + fact_tokens);

        let blob = ContextBlob {
            kernel,
            hot_messages,
            retrieved,
            self_facts,
            total_tokens: budget.spent,
        };
        debug!(
            total_tokens = blob.total_tokens,
            kernel = blob.kernel.len(),
            hot = blob.hot_messages.len(),
            retrieved = blob.retrieved.len(),
            facts = blob.self_facts.len(),
            "context assembled"
        );
        Ok(blob)
    }

    fn build_kernel(&self, graph: &SelfModelGraph, budget: &mut TokenBudget) -> Vec<String> {
        let mut nodes = graph.query(&NodeFilter::of_type(NodeType::IdentityCore));
        nodes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut kernel = Vec::new();
        for node in nodes {
            let tokens = estimate_body_tokens(&node.content);
            if budget.charge(tokens) {
                kernel.push(node.content.clone());
            }
        }
        kernel
    }

    fn build_hot_tier(
        &self,
        conversation_id: &ConversationId,
        cap: u32,
    ) -> Result<Vec<Message>> {
        let rendered = self.store.get_hot_context(conversation_id)?;
        // Newest first: walk backwards accumulating what fits, keep order.
        let mut kept = 0_usize;
        let mut used = 0_u32;
        for message in rendered.iter().rev() {
            if used + message.token_count > cap {
                break;
            }
            used += message.token_count;
            kept += 1;
        }
        Ok(rendered[rendered.len() - kept..].to_vec())
    }
}

/// Build tier-4 candidates: active non-kernel facts, highest confidence
/// first, newest first among equals.
fn build_self_facts(graph: &SelfModelGraph) -> Vec<SelfFact> {
    let mut nodes: Vec<_> = graph
        .query(&NodeFilter::default())
        .into_iter()
        .filter(|n| n.node_type != NodeType::IdentityCore)
        .collect();
    nodes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    nodes
        .into_iter()
        .map(|n| SelfFact {
            node_id: n.id.clone(),
            node_type: n.node_type.as_str().to_owned(),
            content: n.content.clone(),
            confidence: n.confidence,
            grounded: n.is_grounded(),
            tokens: estimate_body_tokens(&n.content),
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
