//! The `DynaRag` facade: one value that owns every component.
//!
//! Every entry point takes a [`Caller`] whose `owner_scope` partitions data
//! and whose `client_key` is charged against the rate limiter. The rate
//! limiter is consulted before any other work.
//!
//! The LLM client is built on the first `query`, so ingest-only deployments
//! never need an API token.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::OnceCell;
use tracing::info;

use dynarag_core::embedding::Embedder;
use dynarag_core::error::RagResult;
use dynarag_core::models::{
    ChunkMatch, ChunkRecord, DeletionStats, Document, Embedding, IngestChunk, StorageStats,
};
use dynarag_core::prompt::{PromptOptions, TemplateManager};
use dynarag_core::store::Store;

use crate::batch::{BatchCoordinator, BatchProgress, CancellationToken};
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, SharedEmbedder};
use crate::embedding_store::EmbeddingStore;
use crate::llm::LlmClient;
use crate::migrate;
use crate::progress::BatchProgressReporter;
use crate::rag::{self, AnswerRequest, CUSTOM_TEMPLATE_NAME};
use crate::rate_limit::RateLimiter;
use crate::sqlite_store::SqliteStore;

/// Identity attached to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Validated tenant identifier, treated as opaque.
    pub owner_scope: String,
    /// Identity charged by the rate limiter.
    pub client_key: String,
}

impl Caller {
    pub fn new(owner_scope: impl Into<String>, client_key: impl Into<String>) -> Self {
        Self {
            owner_scope: owner_scope.into(),
            client_key: client_key.into(),
        }
    }

    /// A caller whose rate-limit identity is its owner scope.
    pub fn local(owner_scope: impl Into<String>) -> Self {
        let owner_scope = owner_scope.into();
        Self {
            client_key: owner_scope.clone(),
            owner_scope,
        }
    }
}

pub struct DynaRag {
    config: Config,
    embedder: Arc<SharedEmbedder>,
    store: Arc<EmbeddingStore>,
    batch: BatchCoordinator,
    limiter: Option<RateLimiter>,
    llm: OnceCell<LlmClient>,
    custom_template: Option<String>,
}

impl DynaRag {
    /// Open the SQLite database (migrating it if needed) and build every
    /// component from `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::migrate_pool(&pool).await?;
        let embedder = create_embedder(&config.embedding)?;
        let limiter = if config.rate_limit.enabled {
            Some(RateLimiter::from_config(&config.rate_limit)?)
        } else {
            None
        };
        let custom_template = match &config.prompt.template_path {
            Some(path) => Some(load_template(path).await?),
            None => None,
        };

        let mut rag = Self::with_parts(config, embedder, Arc::new(SqliteStore::new(pool)), limiter);
        rag.custom_template = custom_template;
        Ok(rag)
    }

    /// Assemble from explicit parts. No template file is read.
    pub fn with_parts(
        config: Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
        limiter: Option<RateLimiter>,
    ) -> Self {
        let embedder = Arc::new(SharedEmbedder::new(embedder));
        let store = Arc::new(EmbeddingStore::new(Arc::clone(&embedder), store));
        let batch = BatchCoordinator::new(Arc::clone(&store), config.batch.concurrency);
        Self {
            config,
            embedder,
            store,
            batch,
            limiter,
            llm: OnceCell::new(),
            custom_template: None,
        }
    }

    /// Use `client` for generation instead of building one from the
    /// environment.
    pub fn with_llm(mut self, client: LlmClient) -> Self {
        self.llm = OnceCell::new_with(Some(client));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn admit(&self, caller: &Caller) -> RagResult<()> {
        match &self.limiter {
            Some(limiter) => limiter.check(&caller.client_key).await,
            None => Ok(()),
        }
    }

    async fn llm(&self) -> RagResult<&LlmClient> {
        self.llm
            .get_or_try_init(|| async { LlmClient::from_env(&self.config.llm) })
            .await
    }

    fn k_or_default(&self, k: Option<i64>) -> i64 {
        k.unwrap_or(self.config.retrieval.default_k)
    }

    /// Embed and store one chunk.
    pub async fn chunk(&self, caller: &Caller, chunk: &IngestChunk) -> RagResult<Embedding> {
        self.admit(caller).await?;
        self.store.add(&caller.owner_scope, chunk).await
    }

    /// Nearest stored chunks to `text`.
    pub async fn similar(
        &self,
        caller: &Caller,
        text: &str,
        k: Option<i64>,
        metadata_filter: Option<&Value>,
    ) -> RagResult<Vec<ChunkMatch>> {
        self.admit(caller).await?;
        self.store
            .top_k(&caller.owner_scope, text, self.k_or_default(k), metadata_filter)
            .await
    }

    /// Answer `query` from the caller's chunks, streaming into `sink`.
    /// Returns the chunks used as context.
    pub async fn query<W>(
        &self,
        caller: &Caller,
        query: &str,
        k: Option<i64>,
        metadata_filter: Option<&Value>,
        sink: &mut W,
    ) -> RagResult<Vec<ChunkMatch>>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.admit(caller).await?;
        let llm = self.llm().await?;
        let options: PromptOptions = self.config.prompt.options();
        let request = AnswerRequest {
            owner: &caller.owner_scope,
            query,
            k: self.k_or_default(k),
            metadata_filter,
            options: &options,
            custom_template: self.custom_template.as_deref(),
        };
        rag::answer(&self.store, llm, &request, sink).await
    }

    /// Ingest many chunks concurrently; see [`BatchCoordinator::run`].
    pub async fn batch(
        &self,
        caller: &Caller,
        chunks: Vec<IngestChunk>,
        cancel: &CancellationToken,
        reporter: &dyn BatchProgressReporter,
    ) -> RagResult<BatchProgress> {
        self.admit(caller).await?;
        self.batch
            .run(&caller.owner_scope, chunks, cancel, reporter)
            .await
    }

    pub async fn list_chunks(
        &self,
        caller: &Caller,
        metadata_filter: Option<&Value>,
    ) -> RagResult<Vec<ChunkRecord>> {
        self.admit(caller).await?;
        self.store
            .list_chunks(&caller.owner_scope, metadata_filter)
            .await
    }

    pub async fn list_documents(&self, caller: &Caller) -> RagResult<Vec<Document>> {
        self.admit(caller).await?;
        self.store.list_documents(&caller.owner_scope).await
    }

    /// Delete all of the caller's embeddings, or only report with `dry_run`.
    pub async fn purge(&self, caller: &Caller, dry_run: bool) -> RagResult<DeletionStats> {
        self.admit(caller).await?;
        let stats = self.store.delete(&caller.owner_scope, dry_run).await?;
        if !dry_run {
            info!(
                owner = %caller.owner_scope,
                embeddings = stats.embedding_count,
                documents = stats.document_count,
                "purged embeddings"
            );
        }
        Ok(stats)
    }

    pub async fn stats(&self, caller: &Caller) -> RagResult<StorageStats> {
        self.admit(caller).await?;
        self.store.stats(&caller.owner_scope).await
    }

    /// Release the embedding model. Later embedding calls fail.
    pub async fn shutdown(&self) -> RagResult<()> {
        self.embedder.shutdown().await
    }
}

async fn load_template(path: &std::path::Path) -> Result<String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompt template: {}", path.display()))?;
    TemplateManager::new()
        .register(CUSTOM_TEMPLATE_NAME, &content)
        .with_context(|| format!("Invalid prompt template: {}", path.display()))?;
    Ok(content)
}
