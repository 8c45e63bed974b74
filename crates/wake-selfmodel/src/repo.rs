//! SQLite persistence for the self-model graph.
//!
//! Methods take `&Connection` so graph writes can share a transaction with
//! the structured store. Persistence is wholesale per owner: the graph is
//! small (hundreds of nodes, not millions), and rewriting it atomically is
//! simpler and safer than diffing. Superseded nodes are part of the graph
//! and are persisted like any other — history is never dropped.

use rusqlite::{Connection, params};
use wake_core::errors::{PersistenceError, PersistenceOperation, Result};
use wake_core::ids::{NodeId, OwnerId, RecordId};

use crate::graph::SelfModelGraph;
use crate::types::{Edge, EvidenceRef, Node};

fn read_err(table: &str, e: rusqlite::Error) -> PersistenceError {
    PersistenceError::new(table, PersistenceOperation::Read, e.to_string()).with_source(e)
}

fn write_err(table: &str, e: rusqlite::Error) -> PersistenceError {
    PersistenceError::new(table, PersistenceOperation::Write, e.to_string()).with_source(e)
}

/// Repository for persisting self-model graphs.
#[derive(Clone, Copy, Debug, Default)]
pub struct GraphRepo;

impl GraphRepo {
    /// Create the self-model tables if they don't exist.
    pub fn ensure_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS selfmodel_nodes (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                content TEXT NOT NULL,
                confidence REAL NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                superseded_by TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_selfmodel_nodes_owner
                ON selfmodel_nodes(owner_id);
            CREATE TABLE IF NOT EXISTS selfmodel_evidence (
                node_id TEXT NOT NULL,
                record_id TEXT NOT NULL,
                attached_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_selfmodel_evidence_node
                ON selfmodel_evidence(node_id);
            CREATE TABLE IF NOT EXISTS selfmodel_edges (
                owner_id TEXT NOT NULL,
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                relation TEXT NOT NULL
            )",
        )
        .map_err(|e| write_err("selfmodel_nodes", e))?;
        Ok(())
    }

    /// Persist an owner's graph, replacing the previous stored state.
    ///
    /// Runs in a single transaction: a reader sees either the old graph or
    /// the new one, never a partial write.
    pub fn save_graph(
        conn: &mut Connection,
        owner_id: &OwnerId,
        graph: &SelfModelGraph,
    ) -> Result<()> {
        let tx = conn
            .transaction()
            .map_err(|e| write_err("selfmodel_nodes", e))?;

        let _ = tx
            .execute(
                "DELETE FROM selfmodel_evidence WHERE node_id IN
                 (SELECT id FROM selfmodel_nodes WHERE owner_id = ?1)",
                params![owner_id.as_str()],
            )
            .map_err(|e| write_err("selfmodel_evidence", e))?;
        let _ = tx
            .execute(
                "DELETE FROM selfmodel_nodes WHERE owner_id = ?1",
                params![owner_id.as_str()],
            )
            .map_err(|e| write_err("selfmodel_nodes", e))?;
        let _ = tx
            .execute(
                "DELETE FROM selfmodel_edges WHERE owner_id = ?1",
                params![owner_id.as_str()],
            )
            .map_err(|e| write_err("selfmodel_edges", e))?;

        for node in graph.query(&crate::graph::NodeFilter::default()) {
            Self::insert_node(&tx, node)?;
        }
        for node in graph.query(
            &crate::graph::NodeFilter::default().with_state(crate::types::NodeState::Superseded),
        ) {
            Self::insert_node(&tx, node)?;
        }
        for edge in graph.edges() {
            let _ = tx
                .execute(
                    "INSERT INTO selfmodel_edges (owner_id, from_id, to_id, relation)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        owner_id.as_str(),
                        edge.from.as_str(),
                        edge.to.as_str(),
                        edge.relation.as_str()
                    ],
                )
                .map_err(|e| write_err("selfmodel_edges", e))?;
        }

        tx.commit().map_err(|e| write_err("selfmodel_nodes", e))?;
        Ok(())
    }

    fn insert_node(conn: &Connection, node: &Node) -> Result<()> {
        let _ = conn
            .execute(
                "INSERT INTO selfmodel_nodes
                 (id, owner_id, node_type, content, confidence, state, created_at, superseded_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    node.id.as_str(),
                    node.owner_id.as_str(),
                    node.node_type.as_str(),
                    node.content,
                    f64::from(node.confidence),
                    node.state.as_str(),
                    node.created_at.to_rfc3339(),
                    node.superseded_by.as_ref().map(NodeId::as_str),
                ],
            )
            .map_err(|e| write_err("selfmodel_nodes", e))?;
        for evidence in &node.evidence_refs {
            let _ = conn
                .execute(
                    "INSERT INTO selfmodel_evidence (node_id, record_id, attached_at)
                     VALUES (?1, ?2, ?3)",
                    params![
                        node.id.as_str(),
                        evidence.record_id.as_str(),
                        evidence.attached_at.to_rfc3339()
                    ],
                )
                .map_err(|e| write_err("selfmodel_evidence", e))?;
        }
        Ok(())
    }

    /// Load an owner's graph from storage.
    #[allow(clippy::cast_possible_truncation)]
    pub fn load_graph(conn: &Connection, owner_id: &OwnerId) -> Result<SelfModelGraph> {
        let mut stmt = conn
            .prepare(
                "SELECT id, node_type, content, confidence, state, created_at, superseded_by
                 FROM selfmodel_nodes WHERE owner_id = ?1 ORDER BY created_at, id",
            )
            .map_err(|e| read_err("selfmodel_nodes", e))?;

        let mut nodes: Vec<Node> = stmt
            .query_map(params![owner_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(|e| read_err("selfmodel_nodes", e))?
            .filter_map(std::result::Result::ok)
            .filter_map(
                |(id, node_type, content, confidence, state, created_at, superseded_by)| {
                    Some(Node {
                        id: NodeId::from_string(id),
                        owner_id: owner_id.clone(),
                        node_type: node_type.parse().ok()?,
                        content,
                        confidence: confidence as f32,
                        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                            .ok()?
                            .with_timezone(&chrono::Utc),
                        state: state.parse().ok()?,
                        evidence_refs: Vec::new(),
                        superseded_by: superseded_by.map(NodeId::from_string),
                    })
                },
            )
            .collect();

        // Attach evidence refs.
        let mut evidence_stmt = conn
            .prepare(
                "SELECT node_id, record_id, attached_at FROM selfmodel_evidence
                 WHERE node_id IN (SELECT id FROM selfmodel_nodes WHERE owner_id = ?1)
                 ORDER BY attached_at",
            )
            .map_err(|e| read_err("selfmodel_evidence", e))?;
        let evidence_rows: Vec<(String, String, String)> = evidence_stmt
            .query_map(params![owner_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| read_err("selfmodel_evidence", e))?
            .filter_map(std::result::Result::ok)
            .collect();

        for (node_id, record_id, attached_at) in evidence_rows {
            if let Some(node) = nodes.iter_mut().find(|n| n.id.as_str() == node_id) {
                if let Ok(at) = chrono::DateTime::parse_from_rfc3339(&attached_at) {
                    node.evidence_refs.push(EvidenceRef {
                        record_id: RecordId::from_string(record_id),
                        attached_at: at.with_timezone(&chrono::Utc),
                    });
                }
            }
        }

        // Edges.
        let mut edge_stmt = conn
            .prepare(
                "SELECT from_id, to_id, relation FROM selfmodel_edges WHERE owner_id = ?1",
            )
            .map_err(|e| read_err("selfmodel_edges", e))?;
        let edges: Vec<Edge> = edge_stmt
            .query_map(params![owner_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| read_err("selfmodel_edges", e))?
            .filter_map(std::result::Result::ok)
            .filter_map(|(from, to, relation)| {
                Some(Edge {
                    from: NodeId::from_string(from),
                    to: NodeId::from_string(to),
                    relation: relation.parse().ok()?,
                })
            })
            .collect();

        Ok(SelfModelGraph::from_parts(nodes, edges))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
