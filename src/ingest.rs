//! `dynarag chunk` and `dynarag batch`.
//!
//! Batch input is JSON Lines, one chunk per line:
//!
//! ```text
//! {"file_path": "docs/a.md", "chunk_text": "...", "metadata": {"tenant": "a"}}
//! {"file_path": "docs/b.md", "chunk_text": "...", "embedding_text": "..."}
//! ```
//!
//! Blank lines are ignored. Ctrl-C during a batch stops new chunks from
//! starting; chunks already in flight still finish.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

use dynarag_core::models::IngestChunk;

use crate::batch::CancellationToken;
use crate::client::{Caller, DynaRag};
use crate::progress::ProgressMode;

/// Parse a `--metadata` argument.
pub fn parse_metadata_arg(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(s).with_context(|| format!("Invalid metadata JSON: {}", s)))
        .transpose()
}

pub async fn run_chunk(
    rag: &DynaRag,
    caller: &Caller,
    file_path: &str,
    text: &str,
    embed_text: Option<String>,
    metadata: Option<&str>,
) -> Result<()> {
    let chunk = IngestChunk {
        file_path: file_path.to_string(),
        chunk_text: text.to_string(),
        embedding_text: embed_text,
        metadata: parse_metadata_arg(metadata)?,
    };
    let embedding = rag.chunk(caller, &chunk).await?;

    println!("chunk {}", file_path);
    println!("  id: {}", embedding.id);
    println!("  document: {}", embedding.document_id);
    println!("  model: {} ({} dims)", embedding.model_name, embedding.vector.len());
    println!("  bytes: {}", embedding.chunk_size);
    println!("  metadata hash: {}", embedding.metadata_hash);
    println!("ok");
    Ok(())
}

/// Read JSON Lines chunks from `path`.
pub fn read_jsonl(path: &Path) -> Result<Vec<IngestChunk>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file: {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<IngestChunk>(line)
                .with_context(|| format!("{}:{}: invalid chunk", path.display(), i + 1))
        })
        .collect()
}

pub async fn run_batch(
    rag: &DynaRag,
    caller: &Caller,
    path: &Path,
    progress: ProgressMode,
) -> Result<()> {
    let chunks = read_jsonl(path)?;
    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let reporter = progress.reporter();
    let result = rag.batch(caller, chunks, &cancel, reporter.as_ref()).await;
    ctrl_c.abort();
    let snapshot = result?;

    println!("batch {}", path.display());
    println!("  total: {}", snapshot.total);
    println!("  completed: {}", snapshot.completed);
    println!("  failed: {}", snapshot.failed.len());
    for failed in &snapshot.failed {
        println!("    - {}", failed);
    }
    if snapshot.cancelled {
        println!("  cancelled: {} not started", snapshot.total - snapshot.finished());
    }

    if let Some(err) = snapshot.failure() {
        return Err(err.into());
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_read_jsonl_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"file_path":"a.md","chunk_text":"alpha"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"file_path":"b.md","chunk_text":"beta","metadata":{{"tenant":"b"}}}}"#
        )
        .unwrap();

        let chunks = read_jsonl(file.path()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata, Some(json!({"tenant": "b"})));
        assert!(chunks[0].embedding_text.is_none());
    }

    #[test]
    fn test_read_jsonl_reports_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"file_path":"a.md","chunk_text":"alpha"}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        let err = read_jsonl(file.path()).unwrap_err();
        assert!(format!("{}", err).ends_with(":2: invalid chunk"));
    }

    #[test]
    fn test_parse_metadata_arg() {
        assert_eq!(parse_metadata_arg(None).unwrap(), None);
        assert_eq!(
            parse_metadata_arg(Some(r#"{"k":1}"#)).unwrap(),
            Some(json!({"k": 1}))
        );
        assert!(parse_metadata_arg(Some("{")).is_err());
    }
}
