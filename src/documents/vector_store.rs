// SQLite-backed vector index
//
// One table shared by all collections. Embeddings are stored as
// little-endian f32 blobs tagged with the engine that produced them; search
// is a brute-force cosine scan over the rows from the current engine that
// pass the metadata filter. Writes commit before returning.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::embeddings::{cosine_similarity, EmbeddingEngine};
use super::filter::MetadataFilter;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding BLOB NOT NULL,
    embedder TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection);
";

/// A chunk of rendered record text plus its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// Search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

pub struct VectorStore {
    conn: Mutex<Connection>,
    collection: String,
    embedder: Arc<dyn EmbeddingEngine>,
}

impl VectorStore {
    /// Open (or create) the index database at `db_path`
    pub fn open(db_path: &Path, collection: impl Into<String>, embedder: Arc<dyn EmbeddingEngine>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Vector index initialized: {}", db_path.display());
        Self::with_connection(conn, collection, embedder)
    }

    /// In-memory index, gone when dropped
    pub fn in_memory(collection: impl Into<String>, embedder: Arc<dyn EmbeddingEngine>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Self::with_connection(conn, collection, embedder)
    }

    fn with_connection(conn: Connection, collection: impl Into<String>, embedder: Arc<dyn EmbeddingEngine>) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.into(),
            embedder,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embed and insert `chunks` in one transaction
    pub fn add(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let embeddings = chunks
            .iter()
            .map(|c| self.embedder.embed(&c.text))
            .collect::<Result<Vec<_>>>()?;

        let now = chrono::Utc::now().to_rfc3339();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, collection, text, metadata, embedding, embedder, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (chunk, embedding) in chunks.iter().zip(&embeddings) {
                stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    &self.collection,
                    &chunk.text,
                    serde_json::to_string(&chunk.metadata)?,
                    encode_embedding(embedding),
                    self.embedder.name(),
                    &now,
                ])?;
            }
        }
        tx.commit().context("Failed to commit chunks to vector index")?;

        tracing::debug!("Indexed {} chunks into {}", chunks.len(), self.collection);
        Ok(chunks.len())
    }

    /// `k` nearest chunks to `query` among those matching `filter`
    pub fn search(&self, query: &str, filter: Option<&MetadataFilter>, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query)?;

        let foreign = self.foreign_rows()?;
        if foreign > 0 {
            tracing::warn!(
                "Skipping {} chunks in {} embedded by another engine than {}; re-index to search them",
                foreign,
                self.collection,
                self.embedder.name()
            );
        }

        let mut scored: Vec<ScoredChunk> = self
            .rows(filter, Some(self.embedder.name()))?
            .into_iter()
            .map(|(chunk, embedding)| ScoredChunk {
                score: cosine_similarity(&query_embedding, &embedding),
                chunk,
            })
            .collect();

        // Stable: ties keep insertion order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);

        tracing::debug!("Vector search returned {} results", scored.len());
        Ok(scored)
    }

    /// Every chunk in insertion order, optionally filtered. Text export does
    /// not care which engine embedded a row.
    pub fn all(&self, filter: Option<&MetadataFilter>) -> Result<Vec<DocumentChunk>> {
        Ok(self.rows(filter, None)?.into_iter().map(|(chunk, _)| chunk).collect())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
            [&self.collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Rows in the collection that some other engine embedded
    fn foreign_rows(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE collection = ?1 AND embedder != ?2",
            params![&self.collection, self.embedder.name()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn rows(&self, filter: Option<&MetadataFilter>, embedder: Option<&str>) -> Result<Vec<(DocumentChunk, Vec<f32>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT text, metadata, embedding FROM chunks
             WHERE collection = ?1 AND (?2 IS NULL OR embedder = ?2)
             ORDER BY rowid ASC",
        )?;
        let raw: Vec<(String, String, Vec<u8>)> = stmt
            .query_map(params![&self.collection, embedder], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(raw.len());
        for (text, metadata, blob) in raw {
            let metadata: Map<String, Value> =
                serde_json::from_str(&metadata).context("Corrupt chunk metadata in vector index")?;
            if filter.is_some_and(|f| !f.matches(&metadata)) {
                continue;
            }
            rows.push((DocumentChunk { text, metadata }, decode_embedding(&blob)));
        }
        Ok(rows)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Vector index connection mutex poisoned"))
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::embeddings::HashingEmbedding;
    use serde_json::json;

    fn chunk(text: &str, kind: &str) -> DocumentChunk {
        DocumentChunk {
            text: text.to_string(),
            metadata: json!({"type": kind}).as_object().cloned().unwrap(),
        }
    }

    fn store() -> VectorStore {
        VectorStore::in_memory("test", Arc::new(HashingEmbedding::new())).unwrap()
    }

    #[test]
    fn test_add_and_count() -> Result<()> {
        let store = store();
        assert_eq!(store.add(&[chunk("a", "goal"), chunk("b", "activity")])?, 2);
        assert_eq!(store.count()?, 2);
        Ok(())
    }

    #[test]
    fn test_search_ranks_by_similarity() -> Result<()> {
        let store = store();
        store.add(&[
            chunk("budget meeting with finance", "journal_entry"),
            chunk("morning run along the river", "activity"),
        ])?;

        let hits = store.search("river run", None, 5)?;
        assert_eq!(hits.len(), 2);
        assert!(hits[0].chunk.text.contains("river"));
        Ok(())
    }

    #[test]
    fn test_filter_with_no_matches_is_empty() -> Result<()> {
        let store = store();
        store.add(&[chunk("a", "goal")])?;
        let filter = MetadataFilter::new().eq("type", "activity");
        assert!(store.search("a", Some(&filter), 5)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_all_keeps_insertion_order() -> Result<()> {
        let store = store();
        store.add(&[chunk("first", "goal"), chunk("second", "goal"), chunk("third", "activity")])?;
        let texts: Vec<_> = store
            .all(Some(&MetadataFilter::types(&["goal"])))?
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        Ok(())
    }

    #[test]
    fn test_persists_across_reopen() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("index.db");
        {
            let store = VectorStore::open(&path, "c", Arc::new(HashingEmbedding::new()))?;
            store.add(&[chunk("kept", "goal")])?;
        }
        let store = VectorStore::open(&path, "c", Arc::new(HashingEmbedding::new()))?;
        assert_eq!(store.all(None)?[0].text, "kept");

        // Collections are isolated
        let other = VectorStore::open(&path, "other", Arc::new(HashingEmbedding::new()))?;
        assert_eq!(other.count()?, 0);
        Ok(())
    }

    struct RenamedEngine;

    impl EmbeddingEngine for RenamedEngine {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            HashingEmbedding::new().embed(text)
        }

        fn dimension(&self) -> usize {
            384
        }

        fn name(&self) -> &str {
            "other-model"
        }
    }

    #[test]
    fn test_search_ignores_rows_from_another_engine() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("index.db");
        {
            let store = VectorStore::open(&path, "c", Arc::new(HashingEmbedding::new()))?;
            store.add(&[chunk("morning run", "activity")])?;
        }

        // Same dimension, different vector space
        let reopened = VectorStore::open(&path, "c", Arc::new(RenamedEngine))?;
        assert!(reopened.search("morning run", None, 5)?.is_empty());
        assert_eq!(reopened.all(None)?.len(), 1);

        reopened.add(&[chunk("evening run", "activity")])?;
        let hits = reopened.search("run", None, 5)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "evening run");
        Ok(())
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }
}
