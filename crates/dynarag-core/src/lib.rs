//! # DynaRAG Core
//!
//! Runtime-agnostic logic for DynaRAG: data models, the error taxonomy,
//! metadata hashing, the store abstraction with k-NN ranking, the embedding
//! trait, and system-prompt building.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! The `dynarag` crate supplies the SQLite store, embedding providers,
//! LLM client, rate limiter, and batch coordinator on top of it.

pub mod embedding;
pub mod error;
pub mod metadata;
pub mod models;
pub mod prompt;
pub mod store;

pub use error::{RagError, RagResult, ResultExt};
