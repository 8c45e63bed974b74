//! The engine façade.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use wake_context::{ContextAssembler, ContextBlob};
use wake_core::errors::{Result, WakeError};
use wake_core::ids::{ConversationId, NodeId, OwnerId};
use wake_core::llm::LlmClient;
use wake_core::messages::Message;
use wake_core::retry::RetryConfig;
use wake_embeddings::service::Embedder;
use wake_selfmodel::{EvidenceRef, GraphRepo, Node, SelfModelGraph};
use wake_settings::WakeSettings;
use wake_store::{
    CompactionOutcome, Conversation, MemoryStore, RecordQuery, RetrievedRecord,
};
use wake_summarizer::{LlmSummarizer, Summarizer};

use crate::commands::{CommandOutcome, MemoryCommand};
use crate::retry::RetryingSummarizer;
use crate::turns::{TurnOutcome, TurnTicket, TurnTracker};

/// The memory subsystem façade.
///
/// Owns the store, the summarizer (wrapped with retry-once backoff), the
/// context assembler, and turn coordination. Collaborators call the
/// stable API and [`Engine::dispatch`]; everything else is internal.
pub struct Engine {
    store: Arc<MemoryStore>,
    summarizer: Arc<dyn Summarizer>,
    assembler: ContextAssembler,
    turns: TurnTracker,
}

impl Engine {
    /// Open an engine backed by the database at `path`.
    pub fn open(
        path: &Path,
        settings: &WakeSettings,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let store = Arc::new(MemoryStore::open(
            path,
            embedder,
            settings.memory.clone(),
            settings.retrieval.clone(),
        )?);
        Self::with_store(store, settings, llm)
    }

    /// Open an in-memory engine (tests, ephemeral sessions).
    pub fn in_memory(
        settings: &WakeSettings,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let store = Arc::new(MemoryStore::open_in_memory(
            embedder,
            settings.memory.clone(),
            settings.retrieval.clone(),
        )?);
        Self::with_store(store, settings, llm)
    }

    fn with_store(
        store: Arc<MemoryStore>,
        settings: &WakeSettings,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        store.with_connection(|conn| GraphRepo::ensure_tables(conn))?;

        let retry = RetryConfig {
            max_retries: settings.retry.max_retries,
            base_delay_ms: settings.retry.base_delay_ms,
            max_delay_ms: settings.retry.max_delay_ms,
            ..RetryConfig::default()
        };
        let summarizer: Arc<dyn Summarizer> = Arc::new(RetryingSummarizer::new(
            Arc::new(LlmSummarizer::new(llm, &settings.summarizer)),
            retry,
        ));
        let assembler = ContextAssembler::new(
            Arc::clone(&store),
            settings.context.clone(),
            settings.retrieval.top_k,
        );

        Ok(Self {
            store,
            summarizer,
            assembler,
            turns: TurnTracker::new(),
        })
    }

    /// The underlying store (shared with background jobs).
    #[must_use]
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// The summarizer (shared with background jobs).
    #[must_use]
    pub fn summarizer(&self) -> Arc<dyn Summarizer> {
        Arc::clone(&self.summarizer)
    }

    // ─── Stable API ──────────────────────────────────────────────────────

    /// Create a conversation for an owner.
    pub fn create_conversation(&self, owner_id: &OwnerId) -> Result<Conversation> {
        self.store.create_conversation(owner_id)
    }

    /// Append a message to a conversation.
    pub async fn append_message(
        &self,
        conversation_id: &ConversationId,
        message: &Message,
    ) -> Result<u64> {
        self.store.append_message(conversation_id, message).await
    }

    /// The token-bounded hot context for a conversation.
    pub fn get_hot_context(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        self.store.get_hot_context(conversation_id)
    }

    /// Query the record store (semantic, keyword-degraded, or recency).
    pub async fn query_records(&self, query: &RecordQuery) -> Result<Vec<RetrievedRecord>> {
        self.store.query_records(query).await
    }

    /// Assemble the context for a new user turn.
    ///
    /// Self-model degradation does not fail assembly: if the graph cannot
    /// be loaded, the context is built without tiers 1 and 4.
    pub async fn assemble(
        &self,
        conversation_id: &ConversationId,
        new_user_turn: &str,
    ) -> Result<ContextBlob> {
        let owner_id = self.owner_of(conversation_id)?;
        let graph = match self.load_graph(&owner_id) {
            Ok(graph) => graph,
            Err(e) => {
                warn!(%owner_id, error = %e, "self-model unavailable; assembling without it");
                SelfModelGraph::new()
            }
        };
        self.assembler
            .assemble(&graph, conversation_id, new_user_turn)
            .await
    }

    // ─── Turn coordination ───────────────────────────────────────────────

    /// Begin a turn for an incoming user message.
    ///
    /// Appends the user message (strictly serialized per conversation)
    /// and returns a ticket; any older in-flight turn for the same
    /// conversation is now superseded.
    pub async fn begin_turn(
        &self,
        conversation_id: &ConversationId,
        user_message: &Message,
    ) -> Result<TurnTicket> {
        let ticket = self.turns.begin(conversation_id);
        let _ = self
            .store
            .append_message(conversation_id, user_message)
            .await?;
        Ok(ticket)
    }

    /// Complete a turn with the agent's response.
    ///
    /// If a newer turn superseded this one, the response is discarded
    /// (last-write-wins) and the caller should drop it. On success the
    /// response is appended and post-turn maintenance (compaction) runs.
    pub async fn complete_turn(
        &self,
        ticket: &TurnTicket,
        agent_message: &Message,
    ) -> Result<TurnOutcome> {
        if !self.turns.is_current(ticket) {
            debug!(
                conversation_id = %ticket.conversation_id,
                "turn superseded; discarding response"
            );
            return Ok(TurnOutcome::Discarded);
        }
        let seq = self
            .store
            .append_message(&ticket.conversation_id, agent_message)
            .await?;
        self.maintain(&ticket.conversation_id).await;
        Ok(TurnOutcome::Appended { seq })
    }

    /// Post-turn maintenance: compact if the hot context is over budget.
    ///
    /// Fail-silent by contract — memory degradation never fails a turn.
    /// A conflict means compaction or consolidation is already running;
    /// the next turn will try again.
    pub async fn maintain(&self, conversation_id: &ConversationId) {
        match self
            .store
            .compact(conversation_id, self.summarizer.as_ref())
            .await
        {
            Ok(CompactionOutcome::NotNeeded) => {}
            Ok(outcome) => debug!(conversation_id = %conversation_id, ?outcome, "maintenance ran"),
            Err(WakeError::Conflict(_)) => {
                debug!(conversation_id = %conversation_id, "conversation busy; maintenance deferred");
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "maintenance failed");
            }
        }
    }

    // ─── Self-model ──────────────────────────────────────────────────────

    /// Load an owner's self-model graph.
    pub fn load_graph(&self, owner_id: &OwnerId) -> Result<SelfModelGraph> {
        self.store
            .with_connection(|conn| GraphRepo::load_graph(conn, owner_id))
    }

    fn save_graph(&self, owner_id: &OwnerId, graph: &SelfModelGraph) -> Result<()> {
        self.store
            .with_connection(|conn| GraphRepo::save_graph(conn, owner_id, graph))
    }

    /// Contradictory claim pairs in an owner's self-model.
    ///
    /// Runnable as a test fixture as well as interactively.
    pub fn find_contradictions(&self, owner_id: &OwnerId) -> Result<Vec<(NodeId, NodeId)>> {
        Ok(self.load_graph(owner_id)?.find_contradictions())
    }

    /// Active self-model claims with no grounding evidence.
    pub fn ungrounded_claims(&self, owner_id: &OwnerId) -> Result<Vec<Node>> {
        Ok(self
            .load_graph(owner_id)?
            .ungrounded_claims()
            .into_iter()
            .cloned()
            .collect())
    }

    /// Evidence coverage for a node.
    pub fn evidence_coverage(&self, owner_id: &OwnerId, node_id: &NodeId) -> Result<usize> {
        Ok(self.load_graph(owner_id)?.evidence_coverage(node_id))
    }

    // ─── Command dispatch ────────────────────────────────────────────────

    /// Dispatch an agent-invoked memory command.
    pub async fn dispatch(&self, command: MemoryCommand) -> Result<CommandOutcome> {
        match command {
            MemoryCommand::AddObservation {
                owner_id,
                category,
                content,
            } => {
                let id = self
                    .store
                    .add_observation(&owner_id, &category, &content)
                    .await?;
                Ok(CommandOutcome::ObservationAdded(id))
            }
            MemoryCommand::WriteJournal {
                owner_id,
                date,
                body,
            } => {
                let id = self.store.write_journal(&owner_id, date, &body).await?;
                Ok(CommandOutcome::JournalWritten(id))
            }
            MemoryCommand::UpsertProfile {
                owner_id,
                background,
                preferences,
            } => {
                self.store
                    .upsert_profile(&owner_id, &background, &preferences)?;
                Ok(CommandOutcome::ProfileUpdated)
            }
            MemoryCommand::AddNode {
                owner_id,
                node_type,
                content,
                confidence,
            } => {
                let mut graph = self.load_graph(&owner_id)?;
                let id = graph.add_node(Node::proposed(
                    owner_id.clone(),
                    node_type,
                    content,
                    confidence,
                ));
                self.save_graph(&owner_id, &graph)?;
                Ok(CommandOutcome::NodeAdded(id))
            }
            MemoryCommand::AddEdge {
                owner_id,
                from,
                to,
                relation,
            } => {
                let mut graph = self.load_graph(&owner_id)?;
                graph.add_edge(&from, &to, relation)?;
                self.save_graph(&owner_id, &graph)?;
                Ok(CommandOutcome::EdgeAdded)
            }
            MemoryCommand::AttachEvidence {
                owner_id,
                node_id,
                record_id,
            } => {
                // Every claim must trace to a concrete stored record; an
                // evidence ref to nothing is how confabulation starts.
                if self.store.record(&record_id)?.is_none() {
                    return Err(WakeError::invalid_input(format!(
                        "evidence record not found: {record_id}"
                    )));
                }
                let mut graph = self.load_graph(&owner_id)?;
                graph.attach_evidence(&node_id, EvidenceRef::new(record_id))?;
                let coverage = graph.evidence_coverage(&node_id);
                self.save_graph(&owner_id, &graph)?;
                Ok(CommandOutcome::EvidenceAttached { coverage })
            }
            MemoryCommand::SupersedeNode { owner_id, old, new } => {
                let mut graph = self.load_graph(&owner_id)?;
                graph.supersede(&old, &new)?;
                self.save_graph(&owner_id, &graph)?;
                Ok(CommandOutcome::NodeSuperseded)
            }
        }
    }

    fn owner_of(&self, conversation_id: &ConversationId) -> Result<OwnerId> {
        self.store
            .conversation(conversation_id)?
            .map(|c| c.owner_id)
            .ok_or_else(|| {
                WakeError::invalid_input(format!("unknown conversation: {conversation_id}"))
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wake_core::llm::ScriptedLlm;
    use wake_embeddings::service::HashEmbedder;
    use wake_selfmodel::{NodeType, RelationType};

    fn owner() -> OwnerId {
        OwnerId::from("owner-1")
    }

    fn make_engine() -> Engine {
        let settings = WakeSettings {
            retry: wake_settings::RetrySettings {
                base_delay_ms: 1,
                max_delay_ms: 2,
                ..wake_settings::RetrySettings::default()
            },
            ..WakeSettings::default()
        };
        Engine::in_memory(
            &settings,
            Arc::new(ScriptedLlm::new().then_respond("summary")),
            Arc::new(HashEmbedder::new(64)),
        )
        .unwrap()
    }

    // -- turn coordination --

    #[tokio::test]
    async fn turn_roundtrip_appends_both_messages() {
        let engine = make_engine();
        let conv = engine.create_conversation(&owner()).unwrap();

        let ticket = engine
            .begin_turn(&conv.id, &Message::user("hello"))
            .await
            .unwrap();
        let outcome = engine
            .complete_turn(&ticket, &Message::agent("hi there"))
            .await
            .unwrap();

        assert_matches!(outcome, TurnOutcome::Appended { seq: 2 });
        assert_eq!(engine.get_hot_context(&conv.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn superseded_turn_is_discarded() {
        let engine = make_engine();
        let conv = engine.create_conversation(&owner()).unwrap();

        let first = engine
            .begin_turn(&conv.id, &Message::user("first question"))
            .await
            .unwrap();
        let second = engine
            .begin_turn(&conv.id, &Message::user("actually, this instead"))
            .await
            .unwrap();

        // The older in-flight turn completes, but its result is discarded.
        let stale = engine
            .complete_turn(&first, &Message::agent("answer to the first"))
            .await
            .unwrap();
        assert_eq!(stale, TurnOutcome::Discarded);

        let fresh = engine
            .complete_turn(&second, &Message::agent("answer to the second"))
            .await
            .unwrap();
        assert_matches!(fresh, TurnOutcome::Appended { .. });

        // Only the two user messages and the fresh answer are in history.
        let messages = engine.store().messages(&conv.id).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages.last().unwrap().content, "answer to the second");
    }

    // -- self-model dispatch --

    #[tokio::test]
    async fn add_node_then_ground_it() {
        let engine = make_engine();
        let record_id = engine
            .store()
            .add_observation(&owner(), "memory", "recalled the garden plan correctly")
            .await
            .unwrap();

        let outcome = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::Capability,
                content: "I can recall long-term plans".to_owned(),
                confidence: 0.7,
            })
            .await
            .unwrap();
        let CommandOutcome::NodeAdded(node_id) = outcome else {
            panic!("expected node");
        };

        assert_eq!(engine.ungrounded_claims(&owner()).unwrap().len(), 1);

        let outcome = engine
            .dispatch(MemoryCommand::AttachEvidence {
                owner_id: owner(),
                node_id: node_id.clone(),
                record_id,
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::EvidenceAttached { coverage: 1 });
        assert!(engine.ungrounded_claims(&owner()).unwrap().is_empty());
        assert_eq!(engine.evidence_coverage(&owner(), &node_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn evidence_must_point_at_stored_record() {
        let engine = make_engine();
        let outcome = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::GrowthEdge,
                content: "getting better at planning".to_owned(),
                confidence: 0.5,
            })
            .await
            .unwrap();
        let CommandOutcome::NodeAdded(node_id) = outcome else {
            panic!("expected node");
        };

        let err = engine
            .dispatch(MemoryCommand::AttachEvidence {
                owner_id: owner(),
                node_id,
                record_id: wake_core::ids::RecordId::from("nonexistent"),
            })
            .await
            .unwrap_err();
        assert_matches!(err, WakeError::InvalidInput(_));
    }

    #[tokio::test]
    async fn contradiction_check_as_fixture() {
        let engine = make_engine();
        let a = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::Capability,
                content: "I can remember our earlier conversations".to_owned(),
                confidence: 0.8,
            })
            .await
            .unwrap();
        let b = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::Capability,
                content: "I cannot remember our earlier conversations".to_owned(),
                confidence: 0.6,
            })
            .await
            .unwrap();
        let (CommandOutcome::NodeAdded(a), CommandOutcome::NodeAdded(b)) = (a, b) else {
            panic!("expected nodes");
        };

        let pairs = engine.find_contradictions(&owner()).unwrap();
        assert_eq!(pairs.len(), 1);
        let (x, y) = &pairs[0];
        assert!([x, y].contains(&&a) && [x, y].contains(&&b));
    }

    #[tokio::test]
    async fn supersede_via_dispatch_keeps_history() {
        let engine = make_engine();
        let old = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::Preference,
                content: "prefers long answers".to_owned(),
                confidence: 0.6,
            })
            .await
            .unwrap();
        let new = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::Preference,
                content: "prefers short answers".to_owned(),
                confidence: 0.8,
            })
            .await
            .unwrap();
        let (CommandOutcome::NodeAdded(old), CommandOutcome::NodeAdded(new)) = (old, new) else {
            panic!("expected nodes");
        };

        let outcome = engine
            .dispatch(MemoryCommand::SupersedeNode {
                owner_id: owner(),
                old: old.clone(),
                new: new.clone(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::NodeSuperseded);

        let graph = engine.load_graph(&owner()).unwrap();
        assert_eq!(graph.len(), 2, "superseded node retained");
        assert_eq!(graph.node(&old).unwrap().superseded_by.as_ref(), Some(&new));
    }

    #[tokio::test]
    async fn add_edge_via_dispatch() {
        let engine = make_engine();
        let a = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::Observation,
                content: "I paused before answering".to_owned(),
                confidence: 0.9,
            })
            .await
            .unwrap();
        let b = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::GrowthEdge,
                content: "thinking before speaking".to_owned(),
                confidence: 0.5,
            })
            .await
            .unwrap();
        let (CommandOutcome::NodeAdded(a), CommandOutcome::NodeAdded(b)) = (a, b) else {
            panic!("expected nodes");
        };

        let outcome = engine
            .dispatch(MemoryCommand::AddEdge {
                owner_id: owner(),
                from: a,
                to: b,
                relation: RelationType::Supports,
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::EdgeAdded);
        assert_eq!(engine.load_graph(&owner()).unwrap().edges().len(), 1);
    }

    // -- profile & journal dispatch --

    #[tokio::test]
    async fn profile_and_journal_commands() {
        let engine = make_engine();
        let outcome = engine
            .dispatch(MemoryCommand::UpsertProfile {
                owner_id: owner(),
                background: "gardener".to_owned(),
                preferences: "plain language".to_owned(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::ProfileUpdated);

        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let outcome = engine
            .dispatch(MemoryCommand::WriteJournal {
                owner_id: owner(),
                date,
                body: "planted the last tomatoes".to_owned(),
            })
            .await
            .unwrap();
        assert_matches!(outcome, CommandOutcome::JournalWritten(_));
        assert_eq!(
            engine.store().journal(&owner(), date).unwrap().as_deref(),
            Some("planted the last tomatoes")
        );
    }

    // -- assemble --

    #[tokio::test]
    async fn assemble_includes_kernel_from_graph() {
        let engine = make_engine();
        let conv = engine.create_conversation(&owner()).unwrap();
        let _ = engine
            .append_message(&conv.id, &Message::user("hello again"))
            .await
            .unwrap();
        let _ = engine
            .dispatch(MemoryCommand::AddNode {
                owner_id: owner(),
                node_type: NodeType::IdentityCore,
                content: "I keep continuity across our sessions.".to_owned(),
                confidence: 1.0,
            })
            .await
            .unwrap();

        let blob = engine.assemble(&conv.id, "do you remember me?").await.unwrap();
        assert_eq!(blob.kernel.len(), 1);
        assert!(blob.render().contains("continuity across our sessions"));
    }
}
