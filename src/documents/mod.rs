// Document processing for personal records
//
// Records are rendered to canonical text, split into overlapping chunks
// with metadata, and stored in a persistent vector index:
// - SQLite with WAL mode (vector_store)
// - Neural or hashing embeddings
// - Metadata filtering on search and export

mod chunker;
mod embeddings;
mod filter;
mod neural_embedding;
mod records;
mod vector_store;

pub use chunker::{TextSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use embeddings::{cosine_similarity, EmbeddingEngine, HashingEmbedding};
pub use filter::{FieldMatch, MetadataFilter};
pub use neural_embedding::NeuralEmbeddingEngine;
pub use records::{render_value, Activity, Goal, JournalEntry, UserData};
pub use vector_store::{DocumentChunk, ScoredChunk, VectorStore};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::config::AiConfig;

pub const JOURNAL_ENTRY: &str = "journal_entry";
pub const ACTIVITY: &str = "activity";
pub const GOAL: &str = "goal";

const INDEX_FILE_NAME: &str = "index.db";

/// Flattened chunk for training export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingRecord {
    pub text: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub timestamp: String,
    /// Remaining metadata fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Embedding engine named by config: "hash" or a sentence-transformer model
pub fn create_embedding_engine(config: &AiConfig) -> Result<Arc<dyn EmbeddingEngine>> {
    let model = config.vectorstore.embedding_model.as_str();
    if model == "hash" {
        return Ok(Arc::new(HashingEmbedding::new()));
    }
    let engine = NeuralEmbeddingEngine::load(model, config.cache_dir.join("embeddings"))
        .with_context(|| format!("Failed to load embedding model {}", model))?;
    Ok(Arc::new(engine))
}

/// Converts records to chunks and manages the vector index
pub struct DocumentProcessor {
    splitter: TextSplitter,
    store: VectorStore,
}

impl DocumentProcessor {
    pub fn new(store: VectorStore) -> Self {
        Self {
            splitter: TextSplitter::default(),
            store,
        }
    }

    /// Processor over the persistent index configured in `config`
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let embedder = create_embedding_engine(config)?;
        let store = VectorStore::open(
            &config.vectorstore_dir().join(INDEX_FILE_NAME),
            config.vectorstore.collection_name.clone(),
            embedder,
        )?;
        Ok(Self::new(store))
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn process_journal_entries(&self, entries: &[JournalEntry]) -> Vec<DocumentChunk> {
        entries
            .iter()
            .flat_map(|entry| {
                let metadata = object(json!({
                    "type": JOURNAL_ENTRY,
                    "timestamp": timestamp_or_now(entry.created_at.as_deref()),
                    "mood": entry.mood,
                    "tags": entry.tags,
                }));
                self.chunk(&entry.render(), metadata)
            })
            .collect()
    }

    pub fn process_activities(&self, activities: &[Activity]) -> Vec<DocumentChunk> {
        activities
            .iter()
            .flat_map(|activity| {
                let metadata = object(json!({
                    "type": ACTIVITY,
                    "activity_type": activity.activity_type,
                    "timestamp": timestamp_or_now(activity.timestamp.as_deref()),
                }));
                self.chunk(&activity.render(), metadata)
            })
            .collect()
    }

    pub fn process_goals(&self, goals: &[Goal]) -> Vec<DocumentChunk> {
        goals
            .iter()
            .flat_map(|goal| {
                let metadata = object(json!({
                    "type": GOAL,
                    "category": goal.category,
                    "status": goal.status,
                    "timestamp": timestamp_or_now(goal.created_at.as_deref()),
                }));
                self.chunk(&goal.render(), metadata)
            })
            .collect()
    }

    /// Insert chunks; durable once this returns
    pub fn add_to_index(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let added = self.store.add(chunks)?;
        tracing::info!("Added {} chunks to the vector index", added);
        Ok(added)
    }

    /// Up to `k` chunks nearest to `query` that match `filter`
    pub fn search_similar(&self, query: &str, filter: Option<&MetadataFilter>, k: usize) -> Result<Vec<DocumentChunk>> {
        Ok(self
            .store
            .search(query, filter, k)?
            .into_iter()
            .map(|hit| hit.chunk)
            .collect())
    }

    /// All indexed chunks as flat records, optionally restricted by type
    pub fn get_training_data(&self, include_types: Option<&[String]>) -> Result<Vec<TrainingRecord>> {
        let filter = include_types.map(MetadataFilter::types);
        let chunks = self.store.all(filter.as_ref())?;
        Ok(chunks.into_iter().map(training_record).collect())
    }

    fn chunk(&self, text: &str, metadata: Map<String, Value>) -> Vec<DocumentChunk> {
        self.splitter
            .split(text)
            .into_iter()
            .map(|text| DocumentChunk {
                text,
                metadata: metadata.clone(),
            })
            .collect()
    }
}

fn training_record(chunk: DocumentChunk) -> TrainingRecord {
    let mut extra = chunk.metadata;
    let doc_type = extra.remove("type").map(|v| render_value(&v)).unwrap_or_default();
    let timestamp = extra.remove("timestamp").map(|v| render_value(&v)).unwrap_or_default();
    TrainingRecord {
        text: chunk.text,
        doc_type,
        timestamp,
        extra,
    }
}

/// Write records as CSV: text, type, timestamp, then every other metadata
/// key in first-seen order. Missing values are left empty.
pub fn write_training_csv<W: Write>(records: &[TrainingRecord], writer: W) -> Result<()> {
    let mut extra_columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.extra.keys() {
            if !extra_columns.contains(&key.as_str()) {
                extra_columns.push(key);
            }
        }
    }

    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["text", "type", "timestamp"];
    header.extend(&extra_columns);
    wtr.write_record(&header)?;

    for record in records {
        let mut row = vec![record.text.clone(), record.doc_type.clone(), record.timestamp.clone()];
        row.extend(
            extra_columns
                .iter()
                .map(|key| record.extra.get(*key).map(render_value).unwrap_or_default()),
        );
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Export to a CSV file
pub fn export_training_csv(records: &[TrainingRecord], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_training_csv(records, file)
}

/// Read the `text` column of a CSV file
pub fn read_training_texts(path: &Path) -> Result<Vec<String>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let column = rdr
        .headers()?
        .iter()
        .position(|h| h == "text")
        .ok_or_else(|| anyhow::anyhow!("{} has no 'text' column", path.display()))?;

    let mut texts = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if let Some(text) = record.get(column) {
            texts.push(text.to_string());
        }
    }
    Ok(texts)
}

fn timestamp_or_now(ts: Option<&str>) -> String {
    ts.map(str::to_string)
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339())
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
