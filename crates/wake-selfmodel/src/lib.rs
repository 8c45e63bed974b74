//! # wake-selfmodel
//!
//! The agent's typed identity graph: capabilities, limitations, growth
//! edges, relationships, observations, and preferences, linked by typed
//! edges and grounded (or not) in evidence references.
//!
//! ## Structure
//!
//! The graph is an arena of nodes plus a separate edge list referencing
//! node IDs — no in-memory back-pointers, traversal is by index lookup, so
//! cyclic edges are harmless.
//!
//! ## Continuity
//!
//! Nodes are never deleted. A node's state only moves forward:
//! `proposed → grounded → superseded`. Superseding retains the old node
//! for history and links it to its replacement.
//!
//! ## Coherence
//!
//! [`graph::SelfModelGraph::find_contradictions`] is a best-effort
//! heuristic, not a theorem prover: it reports explicit `contradicts`
//! edges and negation-pattern clashes between similar claims. Content it
//! cannot analyze is skipped, never an error. Ungrounded claims are
//! **flagged, not rejected** — the check runs from tests and background
//! jobs, off the turn path.

#![deny(unsafe_code)]

pub mod graph;
pub mod repo;
pub mod types;

pub use graph::{NodeFilter, SelfModelGraph};
pub use repo::GraphRepo;
pub use types::{Edge, EvidenceRef, Node, NodeState, NodeType, RelationType};
