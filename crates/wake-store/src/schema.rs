//! SQLite schema for the structured store.
//!
//! The vector table (`memory_vectors`) is created by the embeddings crate's
//! repository; everything else lives here. Messages are append-only and
//! keyed by a per-conversation sequence number assigned inside the append
//! transaction.

use rusqlite::Connection;
use wake_core::errors::{PersistenceError, PersistenceOperation, Result};

/// Create all structured tables if they don't exist.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0,
            hot_start_seq INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_owner
            ON conversations(owner_id);

        CREATE TABLE IF NOT EXISTS messages (
            conversation_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            source_model TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (conversation_id, seq)
        );

        CREATE TABLE IF NOT EXISTS summaries (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            start_seq INTEGER NOT NULL,
            end_seq INTEGER NOT NULL,
            body TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_conversation
            ON summaries(conversation_id, start_seq);

        CREATE TABLE IF NOT EXISTS memory_records (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT 'null'
        );
        CREATE INDEX IF NOT EXISTS idx_memory_records_owner
            ON memory_records(owner_id, kind);

        CREATE TABLE IF NOT EXISTS journals (
            owner_id TEXT NOT NULL,
            date TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (owner_id, date)
        );

        CREATE TABLE IF NOT EXISTS user_profiles (
            owner_id TEXT PRIMARY KEY,
            background TEXT NOT NULL DEFAULT '',
            preferences TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS consolidation_runs (
            window_key TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            completed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS compaction_gaps (
            conversation_id TEXT NOT NULL,
            start_seq INTEGER NOT NULL,
            end_seq INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            consolidated INTEGER NOT NULL DEFAULT 0
        )",
    )
    .map_err(|e| {
        PersistenceError::new("schema", PersistenceOperation::Write, e.to_string()).with_source(e)
    })?;
    Ok(())
}
