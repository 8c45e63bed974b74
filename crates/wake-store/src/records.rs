//! Memory record and summary types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wake_core::ids::{ConversationId, OwnerId, RecordId};

/// Kind of a record in the memory store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Compressed span of conversation.
    Summary,
    /// Daily journal artifact.
    Journal,
    /// Categorized note about a user.
    Observation,
    /// Raw chunk of archived conversation.
    RawChunk,
}

impl RecordKind {
    /// SQL-compatible string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Journal => "journal",
            Self::Observation => "observation",
            Self::RawChunk => "raw_chunk",
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "journal" => Ok(Self::Journal),
            "observation" => Ok(Self::Observation),
            "raw_chunk" => Ok(Self::RawChunk),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// A generalized record in the memory store.
///
/// The structured row is authoritative; the embedding lives in the derived
/// vector index and is written in the same transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Unique record ID.
    pub id: RecordId,
    /// Record kind.
    pub kind: RecordKind,
    /// Text content (what gets embedded and retrieved).
    pub text: String,
    /// Owner of the record.
    pub owner_id: OwnerId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Arbitrary metadata (category, source ids, ...).
    pub metadata: serde_json::Value,
}

impl MemoryRecord {
    /// Create a record with a fresh ID and empty metadata.
    #[must_use]
    pub fn new(kind: RecordKind, owner_id: OwnerId, text: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            kind,
            text: text.into(),
            owner_id,
            created_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Use a specific record ID (deterministic IDs make re-runs idempotent).
    #[must_use]
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A query against the record store.
#[derive(Clone, Debug)]
pub struct RecordQuery {
    /// Owner whose records are queried. Mandatory: retrieval never crosses
    /// owner boundaries.
    pub owner_id: OwnerId,
    /// Restrict to specific kinds (empty = all).
    pub kinds: Vec<RecordKind>,
    /// Maximum results.
    pub top_k: usize,
    /// Semantic query text; `None` returns most recent matches instead.
    pub semantic_query: Option<String>,
    /// Restrict observations to a category (matched against metadata).
    pub category: Option<String>,
}

impl RecordQuery {
    /// Query the most recent records for an owner.
    #[must_use]
    pub fn recent(owner_id: OwnerId, top_k: usize) -> Self {
        Self {
            owner_id,
            kinds: Vec::new(),
            top_k,
            semantic_query: None,
            category: None,
        }
    }

    /// Query records semantically similar to the given text.
    #[must_use]
    pub fn semantic(owner_id: OwnerId, query: impl Into<String>, top_k: usize) -> Self {
        Self {
            owner_id,
            kinds: Vec::new(),
            top_k,
            semantic_query: Some(query.into()),
            category: None,
        }
    }

    /// Restrict to the given kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: Vec<RecordKind>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Restrict to a metadata category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// How a retrieved record was ranked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    /// Cosine similarity over embeddings.
    Semantic,
    /// Keyword-overlap fallback (embedding service unavailable).
    Keyword,
    /// Recency ordering (no semantic query given).
    Recency,
}

/// A record returned from a query, with its ranking score.
#[derive(Clone, Debug)]
pub struct RetrievedRecord {
    /// The record.
    pub record: MemoryRecord,
    /// Ranking score (higher = more relevant).
    pub score: f32,
    /// Which ranking path produced the score.
    pub via: RetrievalPath,
}

/// A summary artifact covering a contiguous message range.
///
/// Ranges partition: at most one summary claims a given range, and ranges
/// never overlap.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Record ID (shared with the corresponding memory record).
    pub id: RecordId,
    /// Conversation this summary belongs to.
    pub conversation_id: ConversationId,
    /// First message sequence number covered (inclusive).
    pub start_seq: u64,
    /// Last message sequence number covered (inclusive).
    pub end_seq: u64,
    /// Summary text.
    pub body: String,
    /// Estimated token count of the rendered summary.
    pub token_count: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
