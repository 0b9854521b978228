//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! All state lives behind one `std::sync::RwLock`, so an insert holds a
//! single write guard across the document upsert and the embedding insert
//! and is atomic with respect to every reader. Vector search is brute-force
//! cosine distance over the owner's rows.

use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::error::{RagError, RagResult};
use crate::models::{
    ChunkMatch, ChunkRecord, DeletionStats, Document, Embedding, NewEmbedding, StorageStats,
};

use super::{rank_nearest, NearestQuery, Store};

#[derive(Default)]
struct State {
    documents: Vec<Document>,
    embeddings: Vec<Embedding>,
    next_document_id: i64,
    next_embedding_id: i64,
}

impl State {
    fn owns(&self, owner: &str, document_id: i64) -> Option<&Document> {
        self.documents
            .iter()
            .find(|d| d.id == document_id && d.owner_scope == owner)
    }

    fn owned_embeddings<'a>(
        &'a self,
        owner: &'a str,
    ) -> impl Iterator<Item = (&'a Embedding, &'a Document)> + 'a {
        self.embeddings
            .iter()
            .filter_map(move |e| self.owns(owner, e.document_id).map(|d| (e, d)))
    }
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_embedding(&self, owner: &str, new: &NewEmbedding) -> RagResult<Embedding> {
        let now = now_millis();
        let chunk_size = new.chunk_size();
        let mut state = self.write();

        let existing = state
            .documents
            .iter()
            .position(|d| d.owner_scope == owner && d.file_path == new.file_path);
        let document_id = match existing {
            Some(idx) => {
                let doc = &mut state.documents[idx];
                doc.updated_at = now;
                doc.total_chunk_size += chunk_size;
                doc.id
            }
            None => {
                state.next_document_id += 1;
                let id = state.next_document_id;
                state.documents.push(Document {
                    id,
                    owner_scope: owner.to_string(),
                    file_path: new.file_path.clone(),
                    total_chunk_size: chunk_size,
                    created_at: now,
                    updated_at: now,
                });
                id
            }
        };

        state.next_embedding_id += 1;
        let id = state.next_embedding_id;
        let embedding = Embedding {
            id,
            document_id,
            model_name: new.model_name.clone(),
            chunk_text: new.chunk_text.clone(),
            embedding_text: new.embedding_text.clone(),
            vector: new.vector.clone(),
            chunk_size,
            metadata: new.metadata.clone(),
            metadata_hash: new.metadata_hash.clone(),
            created_at: now,
        };
        state.embeddings.push(embedding.clone());
        Ok(embedding)
    }

    async fn nearest(&self, query: &NearestQuery<'_>) -> RagResult<Vec<ChunkMatch>> {
        if query.k == 0 {
            return Ok(Vec::new());
        }
        let state = self.read();
        let candidates = state
            .owned_embeddings(query.owner)
            .filter(|(e, _)| e.model_name == query.model)
            .filter(|(e, _)| query.metadata_hash.map_or(true, |h| e.metadata_hash == h))
            .map(|(e, d)| {
                let distance = cosine_distance(query.vector, &e.vector);
                ChunkMatch {
                    id: e.id,
                    document_id: e.document_id,
                    file_path: d.file_path.clone(),
                    chunk_text: e.chunk_text.clone(),
                    chunk_size: e.chunk_size,
                    metadata: e.metadata.clone(),
                    distance,
                    similarity: 1.0 - distance,
                }
            })
            .collect();
        Ok(rank_nearest(candidates, query.k))
    }

    async fn delete_embeddings(&self, owner: &str, dry_run: bool) -> RagResult<DeletionStats> {
        let mut state = self.write();

        let mut stats = DeletionStats::default();
        let mut document_ids = BTreeSet::new();
        let mut paths = BTreeSet::new();
        for (e, d) in state.owned_embeddings(owner) {
            stats.embedding_count += 1;
            stats.total_bytes += e.chunk_size;
            document_ids.insert(d.id);
            paths.insert(d.file_path.clone());
        }
        stats.document_count = document_ids.len() as i64;
        stats.file_paths = paths.into_iter().collect();

        if !dry_run {
            state
                .embeddings
                .retain(|e| !document_ids.contains(&e.document_id));
            for doc in state.documents.iter_mut().filter(|d| d.owner_scope == owner) {
                doc.total_chunk_size = 0;
            }
        }
        Ok(stats)
    }

    async fn list_chunks(
        &self,
        owner: &str,
        metadata_hash: Option<&str>,
    ) -> RagResult<Vec<ChunkRecord>> {
        let state = self.read();
        let mut chunks: Vec<ChunkRecord> = state
            .owned_embeddings(owner)
            .filter(|(e, _)| metadata_hash.map_or(true, |h| e.metadata_hash == h))
            .map(|(e, d)| ChunkRecord {
                id: e.id,
                document_id: e.document_id,
                file_path: d.file_path.clone(),
                chunk_text: e.chunk_text.clone(),
                chunk_size: e.chunk_size,
                model_name: e.model_name.clone(),
                metadata: e.metadata.clone(),
                created_at: e.created_at,
            })
            .collect();
        chunks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(chunks)
    }

    async fn list_documents(&self, owner: &str) -> RagResult<Vec<Document>> {
        let state = self.read();
        let mut docs: Vec<Document> = state
            .documents
            .iter()
            .filter(|d| d.owner_scope == owner)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(docs)
    }

    async fn document(&self, owner: &str, file_path: &str) -> RagResult<Document> {
        self.read()
            .documents
            .iter()
            .find(|d| d.owner_scope == owner && d.file_path == file_path)
            .cloned()
            .ok_or_else(|| RagError::NotFound(format!("document '{}'", file_path)))
    }

    async fn stats(&self, owner: &str) -> RagResult<StorageStats> {
        let state = self.read();
        let mut stats = StorageStats {
            document_count: state
                .documents
                .iter()
                .filter(|d| d.owner_scope == owner)
                .count() as i64,
            ..StorageStats::default()
        };
        for (e, _) in state.owned_embeddings(owner) {
            stats.chunk_count += 1;
            stats.total_bytes += e.chunk_size;
        }
        Ok(stats)
    }
}
