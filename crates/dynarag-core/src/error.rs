//! Error taxonomy shared by every DynaRAG component.
//!
//! All library operations return [`RagError`]. Foreign errors (database,
//! HTTP, inference runtime) are folded into [`RagError::Dependency`] via
//! [`ResultExt::dependency`], so callers only ever match on the six kinds
//! below.

use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate.
pub type RagResult<T> = Result<T, RagError>;

/// Top-level error for DynaRAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Malformed or empty input (e.g. an empty message list).
    #[error("validation error: {0}")]
    Validation(String),

    /// A collaborator (store, embedder, LLM endpoint, rate-limit store) is
    /// unreachable or returned an error.
    #[error("{dependency} unavailable: {message}")]
    Dependency {
        dependency: &'static str,
        message: String,
    },

    /// A streamed LLM chunk could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Admission denied by the rate limiter.
    #[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimitExceeded { retry_after: Duration },

    /// Some chunks of a batch failed. Not fatal to the batch itself.
    #[error("{} of {total} chunks failed ({completed} completed)", failed.len())]
    PartialBatchFailure {
        failed: Vec<String>,
        completed: usize,
        total: usize,
    },

    /// The owner scope has no matching rows.
    #[error("not found: {0}")]
    NotFound(String),
}

impl RagError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RagError::Validation(msg.into())
    }

    pub fn dependency(dependency: &'static str, err: impl Display) -> Self {
        RagError::Dependency {
            dependency,
            message: err.to_string(),
        }
    }

    /// True for errors that indicate a collaborator outage rather than bad input.
    pub fn is_dependency(&self) -> bool {
        matches!(self, RagError::Dependency { .. })
    }
}

/// Maps any displayable error into [`RagError::Dependency`].
///
/// ```rust
/// use dynarag_core::error::{RagError, ResultExt};
///
/// let res: Result<(), std::io::Error> =
///     Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
/// let err = res.dependency("sqlite").unwrap_err();
/// assert!(matches!(err, RagError::Dependency { dependency: "sqlite", .. }));
/// ```
pub trait ResultExt<T> {
    fn dependency(self, dependency: &'static str) -> Result<T, RagError>;
}

impl<T, E: Display> ResultExt<T> for Result<T, E> {
    fn dependency(self, dependency: &'static str) -> Result<T, RagError> {
        self.map_err(|e| RagError::dependency(dependency, e))
    }
}
