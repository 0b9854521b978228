//! Owner-scoped ingestion and retrieval.
//!
//! [`EmbeddingStore`] joins the shared embedder to a [`Store`] backend:
//!
//! ```text
//! add:    metadata ──▶ hash ─┐
//!         text ──▶ embed ────┴──▶ Store::insert_embedding (one transaction)
//! top_k:  query ──▶ embed ──▶ Store::nearest (owner, model, hash filter)
//! ```
//!
//! Metadata is an optional JSON object. Absent metadata is stored as `{}`
//! and carries the hash of `{}`; a metadata *filter*, when given, is hashed
//! the same way and compared for exact equality.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use dynarag_core::error::{RagError, RagResult};
use dynarag_core::metadata::metadata_hash;
use dynarag_core::models::{
    ChunkMatch, ChunkRecord, DeletionStats, Document, Embedding, IngestChunk, NewEmbedding,
    StorageStats,
};
use dynarag_core::store::{NearestQuery, Store};

use crate::embedding::SharedEmbedder;

/// Ingestion and retrieval scoped by owner.
pub struct EmbeddingStore {
    embedder: Arc<SharedEmbedder>,
    store: Arc<dyn Store>,
}

fn require(field: &str, value: &str) -> RagResult<()> {
    if value.trim().is_empty() {
        return Err(RagError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Normalize optional metadata to an object, rejecting non-object JSON.
fn normalize_metadata(metadata: Option<&Value>) -> RagResult<Value> {
    match metadata {
        None | Some(Value::Null) => Ok(Value::Object(serde_json::Map::new())),
        Some(v @ Value::Object(_)) => Ok(v.clone()),
        Some(other) => Err(RagError::validation(format!(
            "metadata must be a JSON object, got {}",
            other
        ))),
    }
}

/// Hash a metadata filter, validating it like stored metadata.
fn filter_hash(filter: Option<&Value>) -> RagResult<Option<String>> {
    filter
        .map(|f| normalize_metadata(Some(f)).map(|m| metadata_hash(Some(&m))))
        .transpose()
}

impl EmbeddingStore {
    pub fn new(embedder: Arc<SharedEmbedder>, store: Arc<dyn Store>) -> Self {
        Self { embedder, store }
    }

    /// Embed and persist one chunk.
    ///
    /// The vector is computed from `embedding_text` when given, otherwise
    /// from `chunk_text`. The document upsert and embedding insert commit
    /// together or not at all.
    pub async fn add(&self, owner: &str, chunk: &IngestChunk) -> RagResult<Embedding> {
        require("owner scope", owner)?;
        require("file path", &chunk.file_path)?;
        require("chunk text", &chunk.chunk_text)?;

        let metadata = normalize_metadata(chunk.metadata.as_ref())?;
        let hash = metadata_hash(Some(&metadata));

        let source = chunk
            .embedding_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&chunk.chunk_text);
        let vector = self.embedder.embed_one(source).await?;

        let new = NewEmbedding {
            file_path: chunk.file_path.clone(),
            model_name: self.embedder.model_name().to_string(),
            chunk_text: chunk.chunk_text.clone(),
            embedding_text: chunk.embedding_text.clone(),
            vector,
            metadata,
            metadata_hash: hash,
        };
        let embedding = self.store.insert_embedding(owner, &new).await?;
        debug!(
            owner,
            file_path = %chunk.file_path,
            id = embedding.id,
            bytes = embedding.chunk_size,
            "chunk ingested"
        );
        Ok(embedding)
    }

    /// The `k` stored chunks nearest to `query_text`, closest first.
    ///
    /// `k <= 0` returns an empty list without embedding anything.
    pub async fn top_k(
        &self,
        owner: &str,
        query_text: &str,
        k: i64,
        metadata_filter: Option<&Value>,
    ) -> RagResult<Vec<ChunkMatch>> {
        require("owner scope", owner)?;
        let hash = filter_hash(metadata_filter)?;
        if k <= 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_one(query_text).await?;
        let query = NearestQuery {
            owner,
            vector: &vector,
            model: self.embedder.model_name(),
            k: k as usize,
            metadata_hash: hash.as_deref(),
        };
        let matches = self.store.nearest(&query).await?;
        debug!(owner, k, hits = matches.len(), "nearest-neighbor query");
        Ok(matches)
    }

    /// Delete every embedding of `owner` (or only report, when `dry_run`).
    pub async fn delete(&self, owner: &str, dry_run: bool) -> RagResult<DeletionStats> {
        require("owner scope", owner)?;
        let stats = self.store.delete_embeddings(owner, dry_run).await?;
        debug!(
            owner,
            dry_run,
            embeddings = stats.embedding_count,
            documents = stats.document_count,
            "delete embeddings"
        );
        Ok(stats)
    }

    /// All chunks of `owner`, newest first, optionally filtered by metadata.
    pub async fn list_chunks(
        &self,
        owner: &str,
        metadata_filter: Option<&Value>,
    ) -> RagResult<Vec<ChunkRecord>> {
        require("owner scope", owner)?;
        let hash = filter_hash(metadata_filter)?;
        self.store.list_chunks(owner, hash.as_deref()).await
    }

    pub async fn list_documents(&self, owner: &str) -> RagResult<Vec<Document>> {
        require("owner scope", owner)?;
        self.store.list_documents(owner).await
    }

    pub async fn document(&self, owner: &str, file_path: &str) -> RagResult<Document> {
        require("owner scope", owner)?;
        require("file path", file_path)?;
        self.store.document(owner, file_path).await
    }

    pub async fn stats(&self, owner: &str) -> RagResult<StorageStats> {
        require("owner scope", owner)?;
        self.store.stats(owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dynarag_core::embedding::Embedder;
    use dynarag_core::metadata::empty_metadata_hash;
    use dynarag_core::store::memory::InMemoryStore;
    use serde_json::json;

    /// Embeds text as the lengths of its first two words.
    struct WordLengths;

    #[async_trait]
    impl Embedder for WordLengths {
        fn model_name(&self) -> &str {
            "word-lengths"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut words = t.split_whitespace().map(|w| w.len() as f32);
                    vec![words.next().unwrap_or(0.0), words.next().unwrap_or(1.0)]
                })
                .collect())
        }
    }

    fn store() -> EmbeddingStore {
        EmbeddingStore::new(
            Arc::new(SharedEmbedder::new(Arc::new(WordLengths))),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_add_without_metadata_uses_empty_hash() {
        let es = store();
        let e = es.add("u", &IngestChunk::new("a.md", "hello world")).await.unwrap();
        assert_eq!(e.metadata_hash, empty_metadata_hash());
        assert_eq!(e.metadata, json!({}));
        assert_eq!(e.vector.len(), 2);
        assert_eq!(e.model_name, "word-lengths");
    }

    #[tokio::test]
    async fn test_add_embeds_embedding_text_when_given() {
        let es = store();
        let e = es
            .add(
                "u",
                &IngestChunk::new("a.md", "a bb").with_embedding_text("cccc ddddd"),
            )
            .await
            .unwrap();
        assert_eq!(e.vector, vec![4.0, 5.0]);
        assert_eq!(e.chunk_text, "a bb");
        assert_eq!(e.embedding_text.as_deref(), Some("cccc ddddd"));
    }

    #[tokio::test]
    async fn test_add_validates_input() {
        let es = store();
        let err = es.add("", &IngestChunk::new("a.md", "x")).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
        let err = es.add("u", &IngestChunk::new(" ", "x")).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
        let err = es
            .add("u", &IngestChunk::new("a.md", "x").with_metadata(json!([1, 2])))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_top_k_bounds() {
        let es = store();
        for text in ["a b", "aa bb", "aaa bbb"] {
            es.add("u", &IngestChunk::new("a.md", text)).await.unwrap();
        }
        assert!(es.top_k("u", "x y", 0, None).await.unwrap().is_empty());
        assert!(es.top_k("u", "x y", -3, None).await.unwrap().is_empty());
        assert_eq!(es.top_k("u", "x y", 1000, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_null_metadata_filter_matches_empty_object() {
        let es = store();
        es.add("u", &IngestChunk::new("a.md", "one two")).await.unwrap();
        es.add(
            "u",
            &IngestChunk::new("b.md", "three four").with_metadata(json!({"k": 1})),
        )
        .await
        .unwrap();

        let unfiltered = es.list_chunks("u", None).await.unwrap();
        assert_eq!(unfiltered.len(), 2);
        let empty = es.list_chunks("u", Some(&json!({}))).await.unwrap();
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].file_path, "a.md");
    }
}
