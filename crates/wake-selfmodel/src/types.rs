//! Self-model node and edge types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wake_core::ids::{NodeId, OwnerId, RecordId};

/// Kind of identity claim a node makes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Core identity statement, part of the fixed context kernel.
    IdentityCore,
    /// Something the agent can do.
    Capability,
    /// Something the agent cannot do.
    Limitation,
    /// A claimed area of ongoing development; may be aspirational.
    GrowthEdge,
    /// A relationship with a person.
    Relationship,
    /// A recorded observation about the agent's own behavior.
    Observation,
    /// A stated preference.
    Preference,
}

impl NodeType {
    /// SQL-compatible string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdentityCore => "identity_core",
            Self::Capability => "capability",
            Self::Limitation => "limitation",
            Self::GrowthEdge => "growth_edge",
            Self::Relationship => "relationship",
            Self::Observation => "observation",
            Self::Preference => "preference",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity_core" => Ok(Self::IdentityCore),
            "capability" => Ok(Self::Capability),
            "limitation" => Ok(Self::Limitation),
            "growth_edge" => Ok(Self::GrowthEdge),
            "relationship" => Ok(Self::Relationship),
            "observation" => Ok(Self::Observation),
            "preference" => Ok(Self::Preference),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

/// Lifecycle state of a node. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Created, no evidence attached yet.
    Proposed,
    /// At least one grounding evidence reference attached.
    Grounded,
    /// Replaced by a newer node; retained for history.
    Superseded,
}

impl NodeState {
    /// SQL-compatible string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Grounded => "grounded",
            Self::Superseded => "superseded",
        }
    }
}

impl std::str::FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(Self::Proposed),
            "grounded" => Ok(Self::Grounded),
            "superseded" => Ok(Self::Superseded),
            other => Err(format!("unknown node state: {other}")),
        }
    }
}

/// Typed relation between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// The source node supports the target's claim.
    Supports,
    /// The source node contradicts the target's claim.
    Contradicts,
    /// The source node evolved from the target.
    EvolvesFrom,
}

impl RelationType {
    /// SQL-compatible string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supports => "supports",
            Self::Contradicts => "contradicts",
            Self::EvolvesFrom => "evolves_from",
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supports" => Ok(Self::Supports),
            "contradicts" => Ok(Self::Contradicts),
            "evolves_from" => Ok(Self::EvolvesFrom),
            other => Err(format!("unknown relation type: {other}")),
        }
    }
}

/// Pointer from a node to a concrete stored record justifying its claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRef {
    /// The record (message, observation, summary) backing the claim.
    pub record_id: RecordId,
    /// When the evidence was attached.
    pub attached_at: DateTime<Utc>,
}

impl EvidenceRef {
    /// Create an evidence reference attached now.
    #[must_use]
    pub fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            attached_at: Utc::now(),
        }
    }
}

/// A node in the self-model graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node ID.
    pub id: NodeId,
    /// Owner whose self-model this node belongs to.
    pub owner_id: OwnerId,
    /// Kind of claim.
    pub node_type: NodeType,
    /// The claim content.
    pub content: String,
    /// Confidence in the claim, 0.0–1.0.
    pub confidence: f32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: NodeState,
    /// Evidence references grounding the claim.
    pub evidence_refs: Vec<EvidenceRef>,
    /// The node that replaced this one, once superseded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<NodeId>,
}

impl Node {
    /// Create a new proposed node with no evidence.
    #[must_use]
    pub fn proposed(
        owner_id: OwnerId,
        node_type: NodeType,
        content: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            id: NodeId::new(),
            owner_id,
            node_type,
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
            state: NodeState::Proposed,
            evidence_refs: Vec::new(),
            superseded_by: None,
        }
    }

    /// Whether this node's claim is backed by at least one evidence ref.
    ///
    /// Distinguishes an aspirational growth edge from an evidenced one.
    #[must_use]
    pub fn is_grounded(&self) -> bool {
        !self.evidence_refs.is_empty()
    }
}

/// A typed edge between two nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source node.
    pub from: NodeId,
    /// Target node.
    pub to: NodeId,
    /// Relation type.
    pub relation: RelationType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_roundtrip() {
        for t in [
            NodeType::IdentityCore,
            NodeType::Capability,
            NodeType::Limitation,
            NodeType::GrowthEdge,
            NodeType::Relationship,
            NodeType::Observation,
            NodeType::Preference,
        ] {
            let parsed: NodeType = t.as_str().parse().unwrap();
            assert_eq!(parsed, t);
        }
    }

    #[test]
    fn node_state_roundtrip() {
        for s in [NodeState::Proposed, NodeState::Grounded, NodeState::Superseded] {
            let parsed: NodeState = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn relation_roundtrip() {
        for r in [
            RelationType::Supports,
            RelationType::Contradicts,
            RelationType::EvolvesFrom,
        ] {
            let parsed: RelationType = r.as_str().parse().unwrap();
            assert_eq!(parsed, r);
        }
    }

    #[test]
    fn unknown_strings_rejected() {
        assert!("belief".parse::<NodeType>().is_err());
        assert!("retracted".parse::<NodeState>().is_err());
        assert!("refutes".parse::<RelationType>().is_err());
    }

    #[test]
    fn proposed_node_starts_ungrounded() {
        let node = Node::proposed(OwnerId::new(), NodeType::GrowthEdge, "learning to plan", 0.6);
        assert_eq!(node.state, NodeState::Proposed);
        assert!(!node.is_grounded());
        assert!(node.superseded_by.is_none());
    }

    #[test]
    fn confidence_clamped() {
        let node = Node::proposed(OwnerId::new(), NodeType::Capability, "x", 1.7);
        assert!((node.confidence - 1.0).abs() < f32::EPSILON);
        let node = Node::proposed(OwnerId::new(), NodeType::Capability, "x", -0.5);
        assert!(node.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn node_serde_camel_case() {
        let node = Node::proposed(OwnerId::from("o1"), NodeType::Preference, "tea over coffee", 0.9);
        let value = serde_json::to_value(&node).unwrap();
        assert!(value.get("nodeType").is_some());
        assert!(value.get("evidenceRefs").is_some());
        assert!(value.get("supersededBy").is_none(), "None is skipped");
    }
}
