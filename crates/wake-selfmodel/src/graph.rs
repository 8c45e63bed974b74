//! The in-memory self-model graph.
//!
//! An arena of nodes plus a separate edge list. All traversal is by ID
//! lookup through the arena index; edges may form cycles freely.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use wake_core::errors::{Result, WakeError};
use wake_core::ids::NodeId;

use crate::types::{Edge, EvidenceRef, Node, NodeState, NodeType, RelationType};

/// Negation markers for the contradiction heuristic.
const NEGATION_MARKERS: &[&str] = &[
    "not", "never", "no longer", "cannot", "can't", "don't", "doesn't", "won't",
];

/// Minimum shared content terms for two claims to be comparable.
const MIN_SHARED_TERMS: usize = 2;

/// Filter for graph queries. Empty filter matches all non-superseded nodes.
#[derive(Clone, Debug, Default)]
pub struct NodeFilter {
    /// Restrict to a node type.
    pub node_type: Option<NodeType>,
    /// Restrict to a lifecycle state (by default superseded nodes are
    /// excluded unless explicitly requested).
    pub state: Option<NodeState>,
    /// Minimum confidence.
    pub min_confidence: Option<f32>,
}

impl NodeFilter {
    /// Filter by node type.
    #[must_use]
    pub fn of_type(node_type: NodeType) -> Self {
        Self {
            node_type: Some(node_type),
            ..Self::default()
        }
    }

    /// Filter by state.
    #[must_use]
    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = Some(state);
        self
    }

    /// Filter by minimum confidence.
    #[must_use]
    pub fn with_min_confidence(mut self, min: f32) -> Self {
        self.min_confidence = Some(min);
        self
    }
}

/// The self-model graph arena.
#[derive(Debug, Default)]
pub struct SelfModelGraph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
}

impl SelfModelGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from persisted nodes and edges.
    #[must_use]
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self { nodes, index, edges }
    }

    /// Number of nodes (including superseded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All edges.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Add a node to the graph, returning its ID.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        let _ = self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Add a typed edge. Both endpoints must exist.
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, relation: RelationType) -> Result<()> {
        if !self.index.contains_key(from) {
            return Err(WakeError::invalid_input(format!("unknown edge source: {from}")));
        }
        if !self.index.contains_key(to) {
            return Err(WakeError::invalid_input(format!("unknown edge target: {to}")));
        }
        self.edges.push(Edge {
            from: from.clone(),
            to: to.clone(),
            relation,
        });
        Ok(())
    }

    /// Look up a node by ID.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.index.get(id).copied().map(|i| &mut self.nodes[i])
    }

    /// Query nodes by filter.
    ///
    /// Superseded nodes are excluded unless the filter asks for them.
    #[must_use]
    pub fn query(&self, filter: &NodeFilter) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| match filter.state {
                Some(state) => n.state == state,
                None => n.state != NodeState::Superseded,
            })
            .filter(|n| filter.node_type.is_none_or(|t| n.node_type == t))
            .filter(|n| filter.min_confidence.is_none_or(|c| n.confidence >= c))
            .collect()
    }

    /// Attach a grounding evidence reference to a node.
    ///
    /// A proposed node becomes grounded; a grounded node stays grounded
    /// with increased coverage. Attaching evidence to a superseded node is
    /// rejected — state never moves backward.
    pub fn attach_evidence(&mut self, id: &NodeId, evidence: EvidenceRef) -> Result<()> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| WakeError::invalid_input(format!("unknown node: {id}")))?;
        if node.state == NodeState::Superseded {
            return Err(WakeError::invalid_input(format!(
                "node {id} is superseded; evidence cannot be attached"
            )));
        }
        node.evidence_refs.push(evidence);
        if node.state == NodeState::Proposed {
            node.state = NodeState::Grounded;
        }
        Ok(())
    }

    /// Supersede `old` with `new`, retaining `old` for history.
    ///
    /// Adds an `evolves_from` edge from the new node to the old. A node
    /// cannot be superseded twice.
    pub fn supersede(&mut self, old: &NodeId, new: &NodeId) -> Result<()> {
        if self.node(new).is_none() {
            return Err(WakeError::invalid_input(format!("unknown replacement node: {new}")));
        }
        {
            let old_node = self
                .node_mut(old)
                .ok_or_else(|| WakeError::invalid_input(format!("unknown node: {old}")))?;
            if old_node.state == NodeState::Superseded {
                return Err(WakeError::invalid_input(format!(
                    "node {old} is already superseded"
                )));
            }
            old_node.state = NodeState::Superseded;
            old_node.superseded_by = Some(new.clone());
        }
        self.add_edge(new, old, RelationType::EvolvesFrom)
    }

    /// Count of grounding evidence references for a node.
    ///
    /// Non-decreasing for any node until it is superseded.
    #[must_use]
    pub fn evidence_coverage(&self, id: &NodeId) -> usize {
        self.node(id).map_or(0, |n| n.evidence_refs.len())
    }

    /// Claims with no grounding evidence: "which of my claimed traits are
    /// actually evidenced?" — these are the ones that are not.
    ///
    /// Superseded nodes are excluded; they are history, not claims.
    #[must_use]
    pub fn ungrounded_claims(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.state != NodeState::Superseded && !n.is_grounded())
            .collect()
    }

    /// Find contradictory node pairs.
    ///
    /// Best-effort heuristic: explicit `contradicts` edges, plus pairs of
    /// active same-type claims where one negates the other (shared content
    /// terms, exactly one side carrying a negation marker). Content that
    /// cannot be matched is simply excluded — never an error.
    #[must_use]
    pub fn find_contradictions(&self) -> Vec<(NodeId, NodeId)> {
        let mut pairs: Vec<(NodeId, NodeId)> = Vec::new();
        let mut seen: HashSet<(NodeId, NodeId)> = HashSet::new();

        // Explicit contradicts edges between active nodes.
        for edge in &self.edges {
            if edge.relation != RelationType::Contradicts {
                continue;
            }
            let (Some(from), Some(to)) = (self.node(&edge.from), self.node(&edge.to)) else {
                continue;
            };
            if from.state == NodeState::Superseded || to.state == NodeState::Superseded {
                continue;
            }
            Self::push_pair(&mut pairs, &mut seen, &edge.from, &edge.to);
        }

        // Negation heuristic over active same-type claim pairs.
        let active: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| n.state != NodeState::Superseded)
            .collect();
        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                if a.node_type != b.node_type {
                    continue;
                }
                if claims_conflict(&a.content, &b.content) {
                    Self::push_pair(&mut pairs, &mut seen, &a.id, &b.id);
                }
            }
        }

        debug!(count = pairs.len(), "contradiction scan complete");
        pairs
    }

    fn push_pair(
        pairs: &mut Vec<(NodeId, NodeId)>,
        seen: &mut HashSet<(NodeId, NodeId)>,
        a: &NodeId,
        b: &NodeId,
    ) {
        let key = if a.as_str() <= b.as_str() {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        if seen.insert(key.clone()) {
            pairs.push(key);
        }
    }
}

/// Content terms with negation markers stripped out.
fn content_terms(content: &str) -> HashSet<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !NEGATION_MARKERS.contains(&t.as_str()))
        .collect()
}

fn is_negated(content: &str) -> bool {
    let lowered = content.to_lowercase();
    if lowered.contains("no longer") {
        return true;
    }
    lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|w| NEGATION_MARKERS.contains(&w))
}

/// Whether two claim contents look like a negation pair.
///
/// Requires enough shared substance terms to be about the same thing, and
/// exactly one side negated. Unanalyzable content (too few terms) never
/// conflicts.
fn claims_conflict(a: &str, b: &str) -> bool {
    let terms_a = content_terms(a);
    let terms_b = content_terms(b);
    if terms_a.is_empty() || terms_b.is_empty() {
        return false;
    }
    let shared = terms_a.intersection(&terms_b).count();
    if shared < MIN_SHARED_TERMS {
        return false;
    }
    is_negated(a) != is_negated(b)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
