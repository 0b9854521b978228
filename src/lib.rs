//! # DynaRAG
//!
//! Owner-scoped retrieval-augmented generation over SQLite.
//!
//! DynaRAG ingests text chunks, embeds them, stores the vectors next to
//! their documents, retrieves the nearest chunks for a query, and streams a
//! language-model answer conditioned on them.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────┐
//!   Caller ────▶ │ RateLimiter  │  (Redis or in-process sliding window)
//!                └──────┬───────┘
//!                       ▼
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Embedder │◀──│EmbeddingStore│──▶│ SqliteStore  │
//! │ fastembed│   │ add / top_k  │   │ docs + vecs  │
//! │ openai.. │   └──────┬───────┘   └──────────────┘
//! └──────────┘          │ matches
//!                       ▼
//!               ┌──────────────┐    ┌──────────────┐
//!               │RagPromptBuild│──▶ │  LlmClient   │──▶ sink
//!               └──────────────┘    │ (SSE stream) │
//!                                   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dynarag init
//! dynarag chunk geo.md "London is the capital of England"
//! dynarag similar "What is the capital of England?" -k 1
//! GROQ_API_TOKEN=... dynarag query "What is the capital of England?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` implementation |
//! | [`embedding`] | Embedding providers and the shared embedder |
//! | [`embedding_store`] | Owner-scoped ingestion and retrieval |
//! | [`batch`] | Concurrent batch ingestion |
//! | [`progress`] | Batch progress reporting |
//! | [`llm`] | Streaming chat-completion client |
//! | [`rag`] | Retrieval-augmented answer flow |
//! | [`rate_limit`] | Sliding-window rate limiter |
//! | [`client`] | The `DynaRag` facade |
//! | [`telemetry`] | Logging setup |

pub mod batch;
pub mod client;
pub mod config;
pub mod db;
pub mod embedding;
pub mod embedding_store;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod rag;
pub mod rate_limit;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod telemetry;

pub use client::{Caller, DynaRag};
pub use dynarag_core::{RagError, RagResult};
