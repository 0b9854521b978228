//! Concurrent batch ingestion with per-chunk failure isolation.
//!
//! [`BatchCoordinator::run`] ingests every chunk through
//! [`EmbeddingStore::add`], each on its own spawned task, at most
//! `concurrency` at a time. One chunk failing never affects its siblings;
//! failures are only recorded, by file path, in the returned
//! [`BatchProgress`].
//!
//! # Tally
//!
//! Completions flow back to the coordinator through the stream it drives.
//! The coordinator is the only code that touches the tally, so the
//! completed counter and the failed list are updated in one place and can
//! never disagree with the number of launched tasks.
//!
//! # Cancellation
//!
//! The [`CancellationToken`] is checked each time a new chunk is about to be
//! launched. Once it is set no further chunks start; chunks already running
//! are not interrupted and are still awaited and tallied.

use futures::future;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use dynarag_core::error::{RagError, RagResult};
use dynarag_core::models::IngestChunk;

use crate::embedding_store::EmbeddingStore;
use crate::progress::{BatchProgressEvent, BatchProgressReporter};

/// A clonable cancellation signal shared between a batch and its caller.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Snapshot of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    /// File paths of failed chunks, in completion order.
    pub failed: Vec<String>,
    /// True when cancellation stopped some chunks from being launched.
    pub cancelled: bool,
}

impl BatchProgress {
    /// Number of chunks that finished, successfully or not.
    pub fn finished(&self) -> usize {
        self.completed + self.failed.len()
    }

    /// `PartialBatchFailure` describing the failed chunks, if any.
    pub fn failure(&self) -> Option<RagError> {
        if self.failed.is_empty() {
            return None;
        }
        Some(RagError::PartialBatchFailure {
            failed: self.failed.clone(),
            completed: self.completed,
            total: self.total,
        })
    }
}

/// Fans a batch of chunks out over the embedding store.
pub struct BatchCoordinator {
    store: Arc<EmbeddingStore>,
    concurrency: usize,
}

impl BatchCoordinator {
    pub fn new(store: Arc<EmbeddingStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Ingest `chunks` for `owner`.
    ///
    /// Returns after every launched chunk has finished. Individual chunk
    /// failures are reported in the snapshot, not as an error; only an
    /// invalid owner scope fails the call itself.
    pub async fn run(
        &self,
        owner: &str,
        chunks: Vec<IngestChunk>,
        cancel: &CancellationToken,
        reporter: &dyn BatchProgressReporter,
    ) -> RagResult<BatchProgress> {
        if owner.trim().is_empty() {
            return Err(RagError::validation("owner scope must not be empty"));
        }

        let mut progress = BatchProgress {
            total: chunks.len(),
            ..BatchProgress::default()
        };
        reporter.report(BatchProgressEvent::Started {
            total: progress.total,
        });

        let owner: Arc<str> = Arc::from(owner);
        let launch_gate = cancel.clone();
        let mut outcomes = stream::iter(chunks)
            .take_while(move |_| future::ready(!launch_gate.is_cancelled()))
            .map(|chunk| {
                let store = Arc::clone(&self.store);
                let owner = Arc::clone(&owner);
                async move {
                    let file_path = chunk.file_path.clone();
                    let outcome = tokio::spawn(async move { store.add(&owner, &chunk).await }).await;
                    (file_path, outcome)
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((file_path, outcome)) = outcomes.next().await {
            let ok = match outcome {
                Ok(Ok(_)) => {
                    progress.completed += 1;
                    true
                }
                Ok(Err(e)) => {
                    warn!(file_path = %file_path, error = %e, "batch chunk failed");
                    progress.failed.push(file_path.clone());
                    false
                }
                Err(join_err) => {
                    error!(file_path = %file_path, error = %join_err, "batch task aborted");
                    progress.failed.push(file_path.clone());
                    false
                }
            };
            reporter.report(BatchProgressEvent::ChunkDone {
                file_path,
                ok,
                completed: progress.completed,
                failed: progress.failed.len(),
                total: progress.total,
            });
        }

        progress.cancelled = progress.finished() < progress.total;
        reporter.report(BatchProgressEvent::Finished {
            completed: progress.completed,
            failed: progress.failed.len(),
            total: progress.total,
            cancelled: progress.cancelled,
        });
        info!(
            owner = %owner,
            total = progress.total,
            completed = progress.completed,
            failed = progress.failed.len(),
            cancelled = progress.cancelled,
            "batch finished"
        );

        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellation_token() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        token.cancel();
        waiter.await.unwrap();
        assert!(clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_failure_snapshot() {
        let mut progress = BatchProgress {
            total: 3,
            completed: 3,
            ..BatchProgress::default()
        };
        assert!(progress.failure().is_none());

        progress.completed = 2;
        progress.failed.push("c.md".to_string());
        match progress.failure() {
            Some(RagError::PartialBatchFailure {
                failed,
                completed,
                total,
            }) => {
                assert_eq!(failed, vec!["c.md"]);
                assert_eq!(completed, 2);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
