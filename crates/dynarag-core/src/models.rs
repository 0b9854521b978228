//! Core data models used throughout DynaRAG.
//!
//! These types represent the documents, embeddings, and retrieval results
//! that flow through the ingestion and query pipeline. Timestamps are Unix
//! epoch milliseconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One logical source, unique per `(owner_scope, file_path)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: i64,
    pub owner_scope: String,
    pub file_path: String,
    /// Sum of the chunk sizes currently stored for this document.
    pub total_chunk_size: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One ingested chunk with its vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    /// Row identity, monotonically increasing; used as the stable tie-breaker.
    pub id: i64,
    pub document_id: i64,
    pub model_name: String,
    pub chunk_text: String,
    /// Text that was embedded instead of `chunk_text`, if one was given.
    pub embedding_text: Option<String>,
    #[serde(skip)]
    pub vector: Vec<f32>,
    /// Byte length of `chunk_text`.
    pub chunk_size: i64,
    pub metadata: Value,
    pub metadata_hash: String,
    pub created_at: i64,
}

/// Everything a [`Store`](crate::store::Store) needs to persist one chunk.
///
/// Built by the embedding store after hashing metadata and embedding text.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub file_path: String,
    pub model_name: String,
    pub chunk_text: String,
    pub embedding_text: Option<String>,
    pub vector: Vec<f32>,
    /// Always an object; absent metadata is stored as `{}`.
    pub metadata: Value,
    pub metadata_hash: String,
}

impl NewEmbedding {
    pub fn chunk_size(&self) -> i64 {
        self.chunk_text.len() as i64
    }
}

/// A k-NN retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMatch {
    pub id: i64,
    pub document_id: i64,
    pub file_path: String,
    pub chunk_text: String,
    pub chunk_size: i64,
    pub metadata: Value,
    /// Cosine distance to the query vector (lower is closer).
    pub distance: f64,
    /// `1 - distance`.
    pub similarity: f64,
}

/// A stored chunk as returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    pub id: i64,
    pub document_id: i64,
    pub file_path: String,
    pub chunk_text: String,
    pub chunk_size: i64,
    pub model_name: String,
    pub metadata: Value,
    pub created_at: i64,
}

/// Aggregate effect of a scoped deletion (or its dry run).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionStats {
    pub embedding_count: i64,
    pub document_count: i64,
    pub total_bytes: i64,
    pub file_paths: Vec<String>,
}

/// Per-owner storage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub document_count: i64,
    pub chunk_count: i64,
    pub total_bytes: i64,
}

/// One chunk submitted for ingestion (single or batch).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestChunk {
    pub file_path: String,
    pub chunk_text: String,
    #[serde(default)]
    pub embedding_text: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl IngestChunk {
    pub fn new(file_path: impl Into<String>, chunk_text: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            chunk_text: chunk_text.into(),
            embedding_text: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_embedding_text(mut self, text: impl Into<String>) -> Self {
        self.embedding_text = Some(text.into());
        self
    }
}
