//! Vector repository with `SQLite` BLOB storage and brute-force KNN search.
//!
//! The repository does not own a connection: every method takes
//! `&Connection` so the caller can run vector writes in the **same
//! transaction** as the structured-record write they derive from. That is
//! what makes "no record queryable on one side but not the other" a plain
//! database property.
//!
//! Every search requires an owner filter. The index is shared across all
//! owners and partitioned logically by `owner_id`; an unfiltered
//! cross-owner query is a correctness bug, so the API does not allow one.

use rusqlite::{Connection, params};

use crate::errors::{EmbeddingError, Result};
use crate::normalize::cosine_similarity;

/// Convert an f32 slice to a byte blob for storage.
#[must_use]
pub fn f32_slice_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a byte blob back to an f32 vector.
#[must_use]
pub fn blob_to_f32_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Options for vector search.
#[derive(Clone, Debug)]
pub struct SearchOptions {
    /// Maximum number of results to return.
    pub limit: usize,
    /// Owner whose records are searched. Mandatory: queries never cross
    /// owner boundaries.
    pub owner_id: String,
    /// Restrict to specific record kinds (empty = all kinds).
    pub kinds: Vec<String>,
}

impl SearchOptions {
    /// Search options for an owner with the given result limit.
    #[must_use]
    pub fn for_owner(owner_id: impl Into<String>, limit: usize) -> Self {
        Self {
            limit,
            owner_id: owner_id.into(),
            kinds: Vec::new(),
        }
    }

    /// Restrict the search to the given record kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: Vec<String>) -> Self {
        self.kinds = kinds;
        self
    }
}

/// A single search result.
#[derive(Clone, Debug)]
pub struct VectorHit {
    /// The record ID of the matched vector.
    pub record_id: String,
    /// Record kind (summary, journal, observation, raw chunk).
    pub kind: String,
    /// Creation timestamp (RFC 3339), used for recency tie-breaks.
    pub created_at: String,
    /// Cosine similarity score (higher = more similar).
    pub similarity: f32,
}

/// Vector repository over a shared `SQLite` connection.
pub struct VectorRepository {
    dims: usize,
}

impl VectorRepository {
    /// Create a repository expecting vectors of `dims` dimensions.
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    /// Expected vector dimensions.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Create the `memory_vectors` table if it doesn't exist.
    pub fn ensure_table(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_vectors (
                record_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memory_vectors_owner
                ON memory_vectors(owner_id)",
        )?;
        Ok(())
    }

    /// Store an embedding (delete-then-insert for upsert).
    ///
    /// Run inside the caller's transaction when paired with a structured
    /// write.
    pub fn store(
        &self,
        conn: &Connection,
        record_id: &str,
        owner_id: &str,
        kind: &str,
        created_at: &str,
        embedding: &[f32],
    ) -> Result<()> {
        if embedding.len() != self.dims {
            return Err(EmbeddingError::Dimensions {
                expected: self.dims,
                actual: embedding.len(),
            });
        }
        let blob = f32_slice_to_blob(embedding);
        let _ = conn.execute(
            "DELETE FROM memory_vectors WHERE record_id = ?1",
            params![record_id],
        )?;
        let _ = conn.execute(
            "INSERT INTO memory_vectors (record_id, owner_id, kind, created_at, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record_id, owner_id, kind, created_at, blob],
        )?;
        Ok(())
    }

    /// Delete a vector by record ID.
    pub fn delete(&self, conn: &Connection, record_id: &str) -> Result<()> {
        let _ = conn.execute(
            "DELETE FROM memory_vectors WHERE record_id = ?1",
            params![record_id],
        )?;
        Ok(())
    }

    /// Whether a vector exists for the given record ID.
    pub fn has_vector(&self, conn: &Connection, record_id: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM memory_vectors WHERE record_id = ?1",
            params![record_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Count stored vectors.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn count(&self, conn: &Connection) -> Result<usize> {
        let count: i64 =
            conn.query_row("SELECT count(*) FROM memory_vectors", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Search for nearest neighbors using brute-force cosine similarity.
    ///
    /// Results are ordered by similarity descending; ties break toward the
    /// newer record.
    pub fn search(
        &self,
        conn: &Connection,
        query: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<VectorHit>> {
        if query.len() != self.dims {
            return Err(EmbeddingError::Dimensions {
                expected: self.dims,
                actual: query.len(),
            });
        }
        let limit = if opts.limit == 0 { 10 } else { opts.limit };
        let rows = Self::load_vectors(conn, opts)?;
        Ok(Self::rank_results(query, rows, limit))
    }

    fn load_vectors(
        conn: &Connection,
        opts: &SearchOptions,
    ) -> Result<Vec<(String, String, String, Vec<u8>)>> {
        let extract_row =
            |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, String, Vec<u8>)> {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            };

        let rows = if opts.kinds.is_empty() {
            let mut stmt = conn.prepare(
                "SELECT record_id, kind, created_at, embedding
                 FROM memory_vectors WHERE owner_id = ?1",
            )?;
            let mapped = stmt.query_map(params![opts.owner_id], extract_row)?;
            mapped.filter_map(std::result::Result::ok).collect()
        } else {
            // Kinds are a small closed set; build the placeholder list.
            let placeholders = opts
                .kinds
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT record_id, kind, created_at, embedding
                 FROM memory_vectors WHERE owner_id = ?1 AND kind IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut bindings: Vec<&dyn rusqlite::ToSql> = vec![&opts.owner_id];
            for kind in &opts.kinds {
                bindings.push(kind);
            }
            let mapped = stmt.query_map(bindings.as_slice(), extract_row)?;
            mapped.filter_map(std::result::Result::ok).collect()
        };

        Ok(rows)
    }

    fn rank_results(
        query: &[f32],
        rows: Vec<(String, String, String, Vec<u8>)>,
        limit: usize,
    ) -> Vec<VectorHit> {
        let mut results: Vec<VectorHit> = rows
            .into_iter()
            .map(|(record_id, kind, created_at, blob)| {
                let embedding = blob_to_f32_vec(&blob);
                let similarity = cosine_similarity(query, &embedding);
                VectorHit {
                    record_id,
                    kind,
                    created_at,
                    similarity,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        results.truncate(limit);
        results
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::normalize::l2_normalize;

    fn open_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn make_repo(conn: &Connection, dims: usize) -> VectorRepository {
        let repo = VectorRepository::new(dims);
        repo.ensure_table(conn).unwrap();
        repo
    }

    fn random_vector(dims: usize, seed: u8) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dims)
            .map(|i| (i as f32 + f32::from(seed) * 7.3).sin())
            .collect();
        l2_normalize(&mut v);
        v
    }

    fn store(repo: &VectorRepository, conn: &Connection, id: &str, owner: &str, seed: u8) {
        repo.store(
            conn,
            id,
            owner,
            "summary",
            "2026-01-01T00:00:00Z",
            &random_vector(repo.dims(), seed),
        )
        .unwrap();
    }

    #[test]
    fn ensure_table_idempotent() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        repo.ensure_table(&conn).unwrap();
        assert_eq!(repo.count(&conn).unwrap(), 0);
    }

    #[test]
    fn store_and_count() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        store(&repo, &conn, "r1", "owner-a", 1);
        assert_eq!(repo.count(&conn).unwrap(), 1);
    }

    #[test]
    fn store_upsert_replaces() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        store(&repo, &conn, "r1", "owner-a", 1);
        store(&repo, &conn, "r1", "owner-a", 2);
        assert_eq!(repo.count(&conn).unwrap(), 1);
    }

    #[test]
    fn store_rejects_wrong_dims() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        let result = repo.store(&conn, "r1", "o", "summary", "2026-01-01T00:00:00Z", &[1.0, 2.0]);
        assert!(matches!(
            result,
            Err(EmbeddingError::Dimensions {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn delete_removes() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        store(&repo, &conn, "r1", "owner-a", 1);
        repo.delete(&conn, "r1").unwrap();
        assert_eq!(repo.count(&conn).unwrap(), 0);
    }

    #[test]
    fn delete_nonexistent_noop() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        repo.delete(&conn, "nonexistent").unwrap();
    }

    #[test]
    fn has_vector_tracks_store_and_delete() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        assert!(!repo.has_vector(&conn, "r1").unwrap());
        store(&repo, &conn, "r1", "owner-a", 1);
        assert!(repo.has_vector(&conn, "r1").unwrap());
        repo.delete(&conn, "r1").unwrap();
        assert!(!repo.has_vector(&conn, "r1").unwrap());
    }

    // -- search --

    #[test]
    fn search_empty_returns_empty() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        let results = repo
            .search(
                &conn,
                &random_vector(4, 0),
                &SearchOptions::for_owner("owner-a", 10),
            )
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn search_orders_by_similarity() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        let query = random_vector(4, 0);
        repo.store(&conn, "exact", "owner-a", "summary", "2026-01-01T00:00:00Z", &query)
            .unwrap();
        store(&repo, &conn, "different", "owner-a", 100);

        let results = repo
            .search(&conn, &query, &SearchOptions::for_owner("owner-a", 10))
            .unwrap();
        assert_eq!(results[0].record_id, "exact");
        assert!(results[0].similarity > results[1].similarity);
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn search_respects_limit() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        for i in 0_u8..5 {
            store(&repo, &conn, &format!("r{i}"), "owner-a", i);
        }
        let results = repo
            .search(
                &conn,
                &random_vector(4, 0),
                &SearchOptions::for_owner("owner-a", 2),
            )
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn search_owner_isolation() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        let query = random_vector(4, 0);
        // Owner B holds the exact match; owner A must never see it.
        repo.store(&conn, "b-exact", "owner-b", "summary", "2026-01-01T00:00:00Z", &query)
            .unwrap();
        store(&repo, &conn, "a-far", "owner-a", 100);

        let results = repo
            .search(&conn, &query, &SearchOptions::for_owner("owner-a", 10))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record_id, "a-far");
    }

    #[test]
    fn search_filters_by_kind() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        repo.store(
            &conn,
            "s1",
            "owner-a",
            "summary",
            "2026-01-01T00:00:00Z",
            &random_vector(4, 1),
        )
        .unwrap();
        repo.store(
            &conn,
            "j1",
            "owner-a",
            "journal",
            "2026-01-01T00:00:00Z",
            &random_vector(4, 2),
        )
        .unwrap();

        let results = repo
            .search(
                &conn,
                &random_vector(4, 0),
                &SearchOptions::for_owner("owner-a", 10).with_kinds(vec!["journal".to_owned()]),
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, "journal");
    }

    #[test]
    fn search_tie_breaks_by_recency() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        let v = random_vector(4, 1);
        // Identical vectors, different timestamps: newer must rank first.
        repo.store(&conn, "old", "owner-a", "summary", "2026-01-01T00:00:00Z", &v)
            .unwrap();
        repo.store(&conn, "new", "owner-a", "summary", "2026-02-01T00:00:00Z", &v)
            .unwrap();

        let results = repo
            .search(&conn, &v, &SearchOptions::for_owner("owner-a", 10))
            .unwrap();
        assert_eq!(results[0].record_id, "new");
        assert_eq!(results[1].record_id, "old");
    }

    #[test]
    fn search_rejects_wrong_query_dims() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        let result = repo.search(&conn, &[1.0, 0.0], &SearchOptions::for_owner("o", 5));
        assert!(matches!(result, Err(EmbeddingError::Dimensions { .. })));
    }

    #[test]
    fn search_zero_limit_defaults_to_ten() {
        let conn = open_db();
        let repo = make_repo(&conn, 4);
        for i in 0_u8..15 {
            store(&repo, &conn, &format!("r{i}"), "owner-a", i);
        }
        let results = repo
            .search(
                &conn,
                &random_vector(4, 0),
                &SearchOptions::for_owner("owner-a", 0),
            )
            .unwrap();
        assert_eq!(results.len(), 10);
    }

    // -- blob codec --

    #[test]
    fn blob_roundtrip_f32() {
        let original = vec![1.0_f32, -2.5, 3.125, 0.0];
        let blob = f32_slice_to_blob(&original);
        let recovered = blob_to_f32_vec(&blob);
        assert_eq!(original, recovered);
    }

    #[test]
    fn blob_roundtrip_512d() {
        let original: Vec<f32> = (0..512).map(|i| i as f32 * 0.001).collect();
        let blob = f32_slice_to_blob(&original);
        let recovered = blob_to_f32_vec(&blob);
        assert_eq!(original, recovered);
    }

    #[test]
    fn store_many_search_completes() {
        let conn = open_db();
        let repo = make_repo(&conn, 64);
        for i in 0_u16..500 {
            repo.store(
                &conn,
                &format!("r{i}"),
                &format!("owner-{}", i % 5),
                "summary",
                "2026-01-01T00:00:00Z",
                &random_vector(64, (i % 256) as u8),
            )
            .unwrap();
        }
        let results = repo
            .search(
                &conn,
                &random_vector(64, 0),
                &SearchOptions::for_owner("owner-0", 5),
            )
            .unwrap();
        assert_eq!(results.len(), 5);
    }
}
