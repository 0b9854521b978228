//! Embedding providers and the shared embedder lifecycle.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`LocalEmbedder`]**: runs models locally via fastembed; no network calls after the
//!   one-time model download.
//!
//! [`SharedEmbedder`] wraps whichever provider is configured. It is
//! constructed once, handed to every component that embeds text, and torn
//! down explicitly with [`SharedEmbedder::shutdown`].
//!
//! # Provider Selection
//!
//! ```rust
//! # use dynarag::config::EmbeddingConfig;
//! # use dynarag::embedding::create_embedder;
//! let config = EmbeddingConfig {
//!     provider: "disabled".to_string(),
//!     ..EmbeddingConfig::default()
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use dynarag_core::embedding::Embedder;
use dynarag_core::error::{RagError, RagResult, ResultExt};

use crate::config::EmbeddingConfig;

const DEP: &str = "embedder";

// ============ Shared lifecycle ============

/// Process-wide embedder handle.
///
/// `embed` holds a shared read guard for the duration of the call, so
/// concurrent embeddings never block one another. `shutdown` takes the
/// exclusive guard, which waits for in-flight calls, then closes the
/// provider; every later call fails with a dependency error.
pub struct SharedEmbedder {
    inner: RwLock<Option<Arc<dyn Embedder>>>,
    model_name: String,
    dims: usize,
}

impl SharedEmbedder {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            model_name: embedder.model_name().to_string(),
            dims: embedder.dims(),
            inner: RwLock::new(Some(embedder)),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed `texts`, checking that one vector of the configured dimension
    /// comes back per input.
    pub async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let guard = self.inner.read().await;
        let embedder = guard
            .as_ref()
            .ok_or_else(|| RagError::dependency(DEP, "embedder has been shut down"))?;

        let vectors = embedder.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(RagError::dependency(
                DEP,
                format!("expected {} vectors, got {}", texts.len(), vectors.len()),
            ));
        }
        if self.dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
                return Err(RagError::dependency(
                    DEP,
                    format!("expected dimension {}, got {}", self.dims, bad.len()),
                ));
            }
        }
        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> RagResult<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::dependency(DEP, "empty embedding response"))
    }

    /// Close the provider. Idempotent.
    pub async fn shutdown(&self) -> RagResult<()> {
        let mut guard = self.inner.write().await;
        match guard.take() {
            Some(embedder) => {
                debug!(model = %self.model_name, "closing embedder");
                embedder.close().await
            }
            None => Ok(()),
        }
    }

    pub async fn is_shut_down(&self) -> bool {
        self.inner.read().await.is_none()
    }
}

// ============ Disabled Provider ============

/// An embedder that always fails.
///
/// Used when `embedding.provider = "disabled"`. Commands that only read
/// or delete stored rows still work.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Err(RagError::dependency(DEP, "embedding provider is disabled"))
    }
}

// ============ HTTP retry helper ============

/// POST `body` to `url`, retrying 429/5xx and network errors with
/// exponential backoff. Returns the decoded JSON body on success.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> RagResult<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.dependency(DEP);
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = RagError::dependency(
                    DEP,
                    format!("{} API error {}: {}", label, status, body_text),
                );

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(attempt, %status, "{} embedding request failed, retrying", label);
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                warn!(attempt, error = %e, "{} embedding request failed, retrying", label);
                last_err = Some(RagError::dependency(
                    DEP,
                    format!("{} connection error ({}): {}", label, url, e),
                ));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        RagError::dependency(DEP, format!("{} embedding failed after retries", label))
    }))
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ OpenAI Provider ============

/// Embedder using the OpenAI `POST /v1/embeddings` endpoint.
///
/// Requires `OPENAI_API_KEY`. Texts are sent in batches of
/// `embedding.batch_size`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            api_key,
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::dependency(DEP, "invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .and_then(parse_vector)
            .ok_or_else(|| RagError::dependency(DEP, "invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = post_json_with_retry(
                &self.client,
                &self.endpoint,
                Some(&self.api_key),
                &body,
                self.max_retries,
                "OpenAI",
            )
            .await?;
            out.extend(parse_openai_response(&json)?);
        }
        Ok(out)
    }
}

// ============ Ollama Provider ============

/// Embedder using a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::dependency(DEP, "invalid Ollama response: missing embeddings array")
        })?;

    embeddings
        .iter()
        .map(|e| {
            parse_vector(e).ok_or_else(|| {
                RagError::dependency(DEP, "invalid Ollama response: embedding is not an array")
            })
        })
        .collect()
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = post_json_with_retry(
                &self.client,
                &endpoint,
                None,
                &body,
                self.max_retries,
                "Ollama",
            )
            .await?;
            out.extend(parse_ollama_response(&json)?);
        }
        Ok(out)
    }
}

// ============ Local Provider (fastembed) ============

/// Resolve the local model name and its dimension.
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Embedder running a fastembed model in-process.
///
/// The model is materialized (downloaded from Hugging Face and cached on
/// first use) lazily, inside `spawn_blocking`, by the first `embed` call.
/// After that no network access is needed.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    fastembed_model: fastembed::EmbeddingModel,
    batch_size: usize,
    cache_dir: Option<std::path::PathBuf>,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            fastembed_model,
            batch_size: config.batch_size,
            cache_dir: config.cache_dir.clone(),
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let slot = Arc::clone(&self.model);
        let fastembed_model = self.fastembed_model.clone();
        let cache_dir = self.cache_dir.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.is_none() {
                let mut options = fastembed::InitOptions::new(fastembed_model)
                    .with_show_download_progress(true);
                if let Some(dir) = cache_dir {
                    options = options.with_cache_dir(dir);
                }
                let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
                    RagError::dependency(
                        DEP,
                        format!("failed to initialize local embedding model: {}", e),
                    )
                })?;
                *guard = Some(model);
            }
            match guard.as_mut() {
                Some(model) => model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| RagError::dependency(DEP, format!("local embedding failed: {}", e))),
                None => Err(RagError::dependency(DEP, "local embedding model unavailable")),
            }
        })
        .await
        .dependency(DEP)?
    }

    async fn close(&self) -> RagResult<()> {
        let slot = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take();
        })
        .await
        .dependency(DEP)
    }
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
