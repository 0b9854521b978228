#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use dynarag::batch::CancellationToken;
use dynarag::db;
use dynarag::embedding::SharedEmbedder;
use dynarag::embedding_store::EmbeddingStore;
use dynarag::migrate;
use dynarag::sqlite_store::SqliteStore;
use dynarag_core::embedding::Embedder;
use dynarag_core::error::{RagError, RagResult};
use dynarag_core::store::Store;

/// Words the keyword-bag embedder counts, one dimension each.
pub const VOCABULARY: &[&str] = &[
    "london", "capital", "england", "paris", "france", "rust", "cargo", "python", "apples",
    "oranges",
];

/// Embeds text as counts of [`VOCABULARY`] words, plus a constant bias
/// dimension so no vector is all zeros.
pub struct KeywordEmbedder;

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; VOCABULARY.len() + 1];
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if let Some(i) = VOCABULARY.iter().position(|w| *w == word) {
            v[i] += 1.0;
        }
    }
    v[VOCABULARY.len()] = 0.1;
    v
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-bag"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Keyword embedder that fails for any text containing `FAIL`.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "keyword-bag"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("FAIL")) {
            return Err(RagError::dependency("embedder", "injected failure"));
        }
        // Give sibling tasks a chance to interleave.
        tokio::task::yield_now().await;
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Keyword embedder that requests cancellation on its first call.
pub struct CancellingEmbedder {
    pub token: CancellationToken,
}

#[async_trait]
impl Embedder for CancellingEmbedder {
    fn model_name(&self) -> &str {
        "keyword-bag"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        self.token.cancel();
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Migrated SQLite store in `dir`.
pub async fn sqlite_store(dir: &Path) -> Arc<SqliteStore> {
    let pool = db::connect_path(&dir.join("dynarag.sqlite")).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

pub fn embedding_store(embedder: Arc<dyn Embedder>, store: Arc<dyn Store>) -> Arc<EmbeddingStore> {
    Arc::new(EmbeddingStore::new(Arc::new(SharedEmbedder::new(embedder)), store))
}
