//! The closed command set for agent-invoked memory mutation.
//!
//! Instead of free-form tool invocation, the agent's journal,
//! observation, profile, and self-model tools are a tagged union
//! dispatched through [`crate::Engine::dispatch`]. Adding a tool means
//! adding a variant — no runtime reflection, and every mutation path is
//! enumerable and testable.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use wake_core::ids::{NodeId, OwnerId, RecordId};
use wake_selfmodel::{NodeType, RelationType};

/// An agent-invoked memory operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MemoryCommand {
    /// Append a categorized observation about a user.
    AddObservation {
        /// Owner the observation is about.
        owner_id: OwnerId,
        /// Observation category.
        category: String,
        /// Observation content.
        content: String,
    },
    /// Write (or regenerate) a daily journal.
    WriteJournal {
        /// Journal owner.
        owner_id: OwnerId,
        /// Journal date.
        date: NaiveDate,
        /// Journal body.
        body: String,
    },
    /// Create or update a user profile.
    UpsertProfile {
        /// Profile owner.
        owner_id: OwnerId,
        /// Background notes.
        background: String,
        /// Communication preferences.
        preferences: String,
    },
    /// Add a proposed self-model node.
    AddNode {
        /// Graph owner.
        owner_id: OwnerId,
        /// Node type.
        node_type: NodeType,
        /// Claim content.
        content: String,
        /// Confidence 0.0–1.0.
        confidence: f32,
    },
    /// Add a typed edge between two self-model nodes.
    AddEdge {
        /// Graph owner.
        owner_id: OwnerId,
        /// Source node.
        from: NodeId,
        /// Target node.
        to: NodeId,
        /// Relation type.
        relation: RelationType,
    },
    /// Ground a self-model node in a stored record.
    AttachEvidence {
        /// Graph owner.
        owner_id: OwnerId,
        /// Node to ground.
        node_id: NodeId,
        /// Record justifying the claim; must exist in the store.
        record_id: RecordId,
    },
    /// Supersede a self-model node with a newer one.
    SupersedeNode {
        /// Graph owner.
        owner_id: OwnerId,
        /// Node being replaced (retained for history).
        old: NodeId,
        /// Replacement node.
        new: NodeId,
    },
}

/// Result of a dispatched command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// An observation record was written.
    ObservationAdded(RecordId),
    /// A journal was written or regenerated.
    JournalWritten(RecordId),
    /// The profile was created or updated.
    ProfileUpdated,
    /// A self-model node was added.
    NodeAdded(NodeId),
    /// An edge was added.
    EdgeAdded,
    /// Evidence was attached; the node's current coverage.
    EvidenceAttached {
        /// Evidence reference count after attachment.
        coverage: usize,
    },
    /// A node was superseded.
    NodeSuperseded,
}
