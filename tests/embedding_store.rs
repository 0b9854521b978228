mod common;

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use common::{embedding_store, sqlite_store, KeywordEmbedder};
use dynarag_core::error::RagError;
use dynarag_core::metadata::empty_metadata_hash;
use dynarag_core::models::IngestChunk;

#[tokio::test]
async fn test_ingest_then_query_single_chunk() {
    let tmp = TempDir::new().unwrap();
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite_store(tmp.path()).await);

    let e = store
        .add("alice", &IngestChunk::new("geo.md", "London is the capital of England"))
        .await
        .unwrap();
    assert_eq!(e.vector.len(), common::VOCABULARY.len() + 1);
    assert_eq!(e.metadata_hash, empty_metadata_hash());

    let hits = store
        .top_k("alice", "What is the capital of England?", 1, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, e.id);
    assert_eq!(hits[0].file_path, "geo.md");
    assert_eq!(hits[0].chunk_text, "London is the capital of England");
    assert!(hits[0].distance < 0.5);
}

#[tokio::test]
async fn test_metadata_filter_beats_vector_distance() {
    let tmp = TempDir::new().unwrap();
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite_store(tmp.path()).await);

    store
        .add(
            "u",
            &IngestChunk::new("a.md", "apples and oranges").with_metadata(json!({"tenant": "a"})),
        )
        .await
        .unwrap();
    store
        .add(
            "u",
            &IngestChunk::new("b.md", "Paris is the capital of France")
                .with_metadata(json!({"tenant": "b"})),
        )
        .await
        .unwrap();

    let unfiltered = store
        .top_k("u", "capital of France", 1, None)
        .await
        .unwrap();
    assert_eq!(unfiltered[0].file_path, "b.md");

    let filtered = store
        .top_k("u", "capital of France", 5, Some(&json!({"tenant": "a"})))
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].file_path, "a.md");
    assert_eq!(filtered[0].metadata, json!({"tenant": "a"}));
}

#[tokio::test]
async fn test_top_k_bounds() {
    let tmp = TempDir::new().unwrap();
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite_store(tmp.path()).await);
    for (path, text) in [("1.md", "rust cargo"), ("2.md", "python"), ("3.md", "london")] {
        store.add("u", &IngestChunk::new(path, text)).await.unwrap();
    }

    assert!(store.top_k("u", "rust", 0, None).await.unwrap().is_empty());
    assert_eq!(store.top_k("u", "rust", 1000, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_equal_distances_order_by_row_id() {
    let tmp = TempDir::new().unwrap();
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite_store(tmp.path()).await);
    let mut ids = Vec::new();
    for path in ["c.md", "a.md", "b.md"] {
        ids.push(store.add("u", &IngestChunk::new(path, "rust")).await.unwrap().id);
    }

    let hits = store.top_k("u", "rust", 3, None).await.unwrap();
    let got: Vec<i64> = hits.iter().map(|h| h.id).collect();
    ids.sort();
    assert_eq!(got, ids);
}

#[tokio::test]
async fn test_owner_scopes_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite_store(tmp.path()).await);
    store.add("alice", &IngestChunk::new("a.md", "rust")).await.unwrap();
    store.add("bob", &IngestChunk::new("a.md", "rust")).await.unwrap();

    assert_eq!(store.top_k("alice", "rust", 10, None).await.unwrap().len(), 1);
    assert_eq!(store.list_documents("bob").await.unwrap().len(), 1);

    store.delete("alice", false).await.unwrap();
    assert!(store.list_chunks("alice", None).await.unwrap().is_empty());
    assert_eq!(store.list_chunks("bob", None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dry_run_then_real_delete() {
    let tmp = TempDir::new().unwrap();
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite_store(tmp.path()).await);
    for d in 0..10 {
        for c in 0..5 {
            store
                .add("u", &IngestChunk::new(format!("doc-{}.md", d), format!("chunk {}", c)))
                .await
                .unwrap();
        }
    }

    let dry = store.delete("u", true).await.unwrap();
    assert_eq!(dry.document_count, 10);
    assert_eq!(dry.embedding_count, 50);
    assert_eq!(dry.file_paths.len(), 10);
    assert_eq!(dry.file_paths[0], "doc-0.md");
    assert_eq!(store.list_chunks("u", None).await.unwrap().len(), 50);

    let real = store.delete("u", false).await.unwrap();
    assert_eq!(real, dry);
    assert!(store.list_chunks("u", None).await.unwrap().is_empty());

    let stats = store.stats("u").await.unwrap();
    assert_eq!(stats.chunk_count, 0);
    assert_eq!(stats.total_bytes, 0);
}

#[tokio::test]
async fn test_failed_insert_rolls_back_document_upsert() {
    let tmp = TempDir::new().unwrap();
    let sqlite = sqlite_store(tmp.path()).await;
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite.clone());

    store.add("u", &IngestChunk::new("a.md", "rust cargo")).await.unwrap();
    let before = store.document("u", "a.md").await.unwrap();

    sqlx::query(
        "CREATE TRIGGER fail_embedding_insert BEFORE INSERT ON embeddings \
         BEGIN SELECT RAISE(ABORT, 'injected'); END",
    )
    .execute(sqlite.pool())
    .await
    .unwrap();

    let err = store
        .add("u", &IngestChunk::new("a.md", "more rust"))
        .await
        .unwrap_err();
    assert!(err.is_dependency());
    let after = store.document("u", "a.md").await.unwrap();
    assert_eq!(after.total_chunk_size, before.total_chunk_size);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(store.list_chunks("u", None).await.unwrap().len(), 1);

    store
        .add("u", &IngestChunk::new("new.md", "python"))
        .await
        .unwrap_err();
    assert!(matches!(
        store.document("u", "new.md").await,
        Err(RagError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reingest_accumulates_document_size() {
    let tmp = TempDir::new().unwrap();
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite_store(tmp.path()).await);
    store.add("u", &IngestChunk::new("a.md", "abc")).await.unwrap();
    store.add("u", &IngestChunk::new("a.md", "defgh")).await.unwrap();

    let docs = store.list_documents("u").await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].total_chunk_size, 8);

    let listed = store.list_chunks("u", None).await.unwrap();
    assert_eq!(listed[0].chunk_text, "defgh");
    assert_eq!(listed[1].chunk_text, "abc");
}

#[tokio::test]
async fn test_embedding_text_is_persisted_and_embedded() {
    let tmp = TempDir::new().unwrap();
    let sqlite = sqlite_store(tmp.path()).await;
    let store = embedding_store(Arc::new(KeywordEmbedder), sqlite.clone());
    store
        .add(
            "u",
            &IngestChunk::new("a.md", "see attached").with_embedding_text("python python"),
        )
        .await
        .unwrap();

    let stored: Option<String> = sqlx::query_scalar("SELECT embedding_text FROM embeddings")
        .fetch_one(sqlite.pool())
        .await
        .unwrap();
    assert_eq!(stored.as_deref(), Some("python python"));

    let hits = store.top_k("u", "python", 1, None).await.unwrap();
    assert!(hits[0].similarity > 0.9);
}
