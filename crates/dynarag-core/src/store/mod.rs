//! Storage abstraction for DynaRAG.
//!
//! The [`Store`] trait defines the persistence operations needed by the
//! ingestion and retrieval pipeline. Vectors are computed before they reach
//! a store; a store only persists, filters, and ranks them.
//!
//! Every operation is scoped by an opaque owner identifier. Rows belonging
//! to one owner are never visible through another owner's calls.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::RagResult;
use crate::models::{
    ChunkMatch, ChunkRecord, DeletionStats, Document, Embedding, NewEmbedding, StorageStats,
};

/// Parameters for a k-nearest-neighbor lookup.
#[derive(Debug, Clone, Copy)]
pub struct NearestQuery<'a> {
    pub owner: &'a str,
    pub vector: &'a [f32],
    /// Only embeddings produced by this model are compared.
    pub model: &'a str,
    pub k: usize,
    /// Exact metadata-hash filter. `None` means no filter, which is not the
    /// same as filtering by the empty-object hash.
    pub metadata_hash: Option<&'a str>,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_embedding`](Store::insert_embedding) | Upsert the document and insert one embedding, atomically |
/// | [`nearest`](Store::nearest) | k-NN by cosine distance |
/// | [`delete_embeddings`](Store::delete_embeddings) | Remove every embedding of an owner (or report what would go) |
/// | [`list_chunks`](Store::list_chunks) | Newest-first listing |
/// | [`list_documents`](Store::list_documents) | Documents of an owner |
/// | [`document`](Store::document) | One document by path |
/// | [`stats`](Store::stats) | Aggregate counts |
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert the `(owner, file_path)` document and insert the embedding
    /// in one transaction. Returns the stored row.
    ///
    /// On an existing document only `updated_at` and the running
    /// `total_chunk_size` change. If any step fails nothing is applied.
    async fn insert_embedding(&self, owner: &str, embedding: &NewEmbedding) -> RagResult<Embedding>;

    /// Return at most `k` matches ordered by ascending distance, ties
    /// broken by ascending row id.
    async fn nearest(&self, query: &NearestQuery<'_>) -> RagResult<Vec<ChunkMatch>>;

    /// Compute deletion statistics for the owner and, unless `dry_run`,
    /// delete all of its embeddings in one transaction. Document rows are
    /// kept. Always returns the pre-deletion statistics.
    async fn delete_embeddings(&self, owner: &str, dry_run: bool) -> RagResult<DeletionStats>;

    /// All embeddings of the owner, newest first.
    async fn list_chunks(
        &self,
        owner: &str,
        metadata_hash: Option<&str>,
    ) -> RagResult<Vec<ChunkRecord>>;

    /// All documents of the owner, most recently updated first.
    async fn list_documents(&self, owner: &str) -> RagResult<Vec<Document>>;

    /// Fetch a document, failing with `NotFound` if the owner has no such path.
    async fn document(&self, owner: &str, file_path: &str) -> RagResult<Document>;

    async fn stats(&self, owner: &str) -> RagResult<StorageStats>;
}

/// Order candidates by ascending distance, then ascending row id, and keep
/// the first `k`.
///
/// Shared by every store so that ranking is identical regardless of backend.
///
/// ```rust
/// use dynarag_core::models::ChunkMatch;
/// use dynarag_core::store::rank_nearest;
///
/// let m = |id: i64, distance: f64| ChunkMatch {
///     id,
///     document_id: 1,
///     file_path: "a.md".into(),
///     chunk_text: String::new(),
///     chunk_size: 0,
///     metadata: serde_json::json!({}),
///     distance,
///     similarity: 1.0 - distance,
/// };
/// let ranked = rank_nearest(vec![m(3, 0.5), m(1, 0.5), m(2, 0.1)], 2);
/// let ids: Vec<i64> = ranked.iter().map(|c| c.id).collect();
/// assert_eq!(ids, vec![2, 1]);
/// ```
pub fn rank_nearest(mut candidates: Vec<ChunkMatch>, k: usize) -> Vec<ChunkMatch> {
    if k == 0 {
        return Vec::new();
    }
    candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(id: i64, distance: f64) -> ChunkMatch {
        ChunkMatch {
            id,
            document_id: 1,
            file_path: format!("doc-{}.md", id),
            chunk_text: format!("chunk {}", id),
            chunk_size: 7,
            metadata: json!({}),
            distance,
            similarity: 1.0 - distance,
        }
    }

    #[test]
    fn test_rank_zero_k_is_empty() {
        assert!(rank_nearest(vec![candidate(1, 0.0)], 0).is_empty());
    }

    #[test]
    fn test_rank_large_k_returns_all() {
        let ranked = rank_nearest(vec![candidate(1, 0.3), candidate(2, 0.1), candidate(3, 0.2)], 1000);
        let ids: Vec<i64> = ranked.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_rank_ties_are_stable_by_id() {
        let input = vec![candidate(9, 0.25), candidate(4, 0.25), candidate(6, 0.25)];
        let first: Vec<i64> = rank_nearest(input.clone(), 3).iter().map(|c| c.id).collect();
        let mut reversed = input;
        reversed.reverse();
        let second: Vec<i64> = rank_nearest(reversed, 3).iter().map(|c| c.id).collect();
        assert_eq!(first, vec![4, 6, 9]);
        assert_eq!(first, second);
    }
}
