use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::MemoryHit;

use crate::embeddings::cosine_similarity;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS embeddings (
        id INTEGER PRIMARY KEY,
        document_id INTEGER REFERENCES documents(id),
        embedding BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_embeddings_doc ON embeddings(document_id);";

/// SQLite-backed document store with embedding vectors.
pub struct SqliteMemory {
    conn: Mutex<Connection>,
}

impl SqliteMemory {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeftError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| WeftError::Database(e.to_string()))?;

        // Concurrent runs read and write without coordination; WAL keeps readers unblocked
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| WeftError::Database(e.to_string()))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| WeftError::Database(e.to_string()))?;

        debug!(path = %path.display(), "SQLite memory opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| WeftError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| WeftError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a document together with its embedding. Returns the document id.
    pub fn insert(
        &self,
        content: &str,
        metadata: &serde_json::Value,
        embedding: &[f32],
    ) -> Result<i64> {
        let mut conn = self.conn.lock().map_err(|e| WeftError::Database(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| WeftError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO documents (content, metadata, created_at) VALUES (?1, ?2, ?3)",
            params![content, metadata.to_string(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| WeftError::Database(e.to_string()))?;
        let document_id = tx.last_insert_rowid();

        let blob: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
        tx.execute(
            "INSERT INTO embeddings (document_id, embedding) VALUES (?1, ?2)",
            params![document_id, blob],
        )
        .map_err(|e| WeftError::Database(e.to_string()))?;

        tx.commit().map_err(|e| WeftError::Database(e.to_string()))?;
        Ok(document_id)
    }

    /// Number of stored documents.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| WeftError::Database(e.to_string()))?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(|e| WeftError::Database(e.to_string()))?;
        Ok(n as usize)
    }

    /// Search for documents similar to a query vector using cosine similarity.
    /// Only documents scoring strictly above `threshold` are returned, best first.
    pub fn search_similar(
        &self,
        query_vec: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<MemoryHit>> {
        let conn = self.conn.lock().map_err(|e| WeftError::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT e.embedding, d.content, d.metadata
                 FROM embeddings e
                 JOIN documents d ON d.id = e.document_id",
            )
            .map_err(|e| WeftError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(0)?;
                let content: String = row.get(1)?;
                let metadata: String = row.get(2)?;
                Ok((blob, content, metadata))
            })
            .map_err(|e| WeftError::Database(e.to_string()))?;

        let mut scored: Vec<MemoryHit> = Vec::new();

        for row in rows {
            let (blob, content, metadata) = row.map_err(|e| WeftError::Database(e.to_string()))?;

            let embedding: Vec<f32> = blob
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();

            let similarity = cosine_similarity(query_vec, &embedding);
            if similarity <= threshold {
                continue;
            }

            scored.push(MemoryHit {
                content,
                similarity,
                metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            });
        }

        // Sort by similarity descending
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);

        Ok(scored)
    }
}
