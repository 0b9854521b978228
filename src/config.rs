//! Configuration loading and validation.
//!
//! DynaRAG is configured by one TOML file. Every option has a default, so a
//! minimal file only needs `[db].path`:
//!
//! ```toml
//! [db]
//! path = "./data/dynarag.sqlite"
//! ```
//!
//! [`load_config`] parses the file and validates it once; the resulting
//! [`Config`] is then passed by reference to everything that needs it.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use dynarag_core::prompt::PromptOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Where the local provider caches downloaded models.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache_dir: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ LLM ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Defaults to the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    /// Defaults to the provider's chat-completions URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer token. Defaults per provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Connect timeout. Streams themselves are not time-limited.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            endpoint: None,
            api_key_env: None,
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "groq".to_string()
}
fn default_temperature() -> f32 {
    0.2
}

// ============ Prompt ============

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_response_style")]
    pub response_style: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Custom system-prompt template; the built-in one is used when unset.
    #[serde(default)]
    pub template_path: Option<PathBuf>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            response_style: default_response_style(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            template_path: None,
        }
    }
}

impl PromptConfig {
    pub fn options(&self) -> PromptOptions {
        PromptOptions {
            response_style: self.response_style.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

fn default_response_style() -> String {
    "concise and factual".to_string()
}
fn default_max_tokens() -> u32 {
    2048
}

// ============ Retrieval / Batch / Rate limit ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
        }
    }
}

fn default_k() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Maximum number of chunks ingested at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Shared window store. When unset the limiter keeps windows in-process.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Bound on establishing the Redis connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on each Redis reply.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Longest accepted `rate_limit.window_secs` (one year).
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_window_secs() -> u64 {
    100
}
fn default_max_requests() -> u64 {
    100
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
fn default_response_timeout_ms() -> u64 {
    500
}

impl Config {
    /// A config with every default and the given database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            prompt: PromptConfig::default(),
            retrieval: RetrievalConfig::default(),
            batch: BatchConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check option ranges and provider names.
pub fn validate(config: &Config) -> Result<()> {
    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() {
                bail!(
                    "embedding.dims must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // LLM
    match config.llm.provider.as_str() {
        "groq" | "openai" => {}
        other => bail!("Unknown llm provider: '{}'. Must be groq or openai.", other),
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    // Prompt
    if config.prompt.max_tokens == 0 {
        bail!("prompt.max_tokens must be > 0");
    }

    // Retrieval / batch
    if config.retrieval.default_k < 1 {
        bail!("retrieval.default_k must be >= 1");
    }
    if config.batch.concurrency == 0 {
        bail!("batch.concurrency must be > 0");
    }

    // Rate limit
    if config.rate_limit.window_secs == 0 {
        bail!("rate_limit.window_secs must be > 0");
    }
    if config.rate_limit.window_secs > MAX_WINDOW_SECS {
        bail!("rate_limit.window_secs must be <= {}", MAX_WINDOW_SECS);
    }
    if config.rate_limit.connect_timeout_ms == 0 || config.rate_limit.response_timeout_ms == 0 {
        bail!("rate_limit timeouts must be > 0");
    }
    if config.rate_limit.max_requests == 0 {
        bail!("rate_limit.max_requests must be > 0");
    }

    Ok(())
}
