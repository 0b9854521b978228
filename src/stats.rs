//! Per-owner listings and statistics: `dynarag stats`, `list`, `documents`
//! and `purge`.

use anyhow::Result;

use crate::client::{Caller, DynaRag};
use crate::ingest::parse_metadata_arg;

pub async fn run_stats(rag: &DynaRag, caller: &Caller) -> Result<()> {
    let stats = rag.stats(caller).await?;
    let db_path = &rag.config().db.path;
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    println!("DynaRAG Stats");
    println!("=============");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Owner:       {}", caller.owner_scope);
    println!();
    println!("  Documents:   {}", stats.document_count);
    println!("  Chunks:      {}", stats.chunk_count);
    println!("  Chunk text:  {}", format_bytes(stats.total_bytes.max(0) as u64));
    println!();
    Ok(())
}

pub async fn run_list(rag: &DynaRag, caller: &Caller, metadata: Option<&str>) -> Result<()> {
    let filter = parse_metadata_arg(metadata)?;
    let chunks = rag.list_chunks(caller, filter.as_ref()).await?;
    if chunks.is_empty() {
        println!("No chunks.");
        return Ok(());
    }

    println!(
        "  {:<8} {:<32} {:>8}  {:<16}  {}",
        "ID", "FILE", "BYTES", "CREATED", "MODEL"
    );
    println!("  {}", "-".repeat(84));
    for c in &chunks {
        println!(
            "  {:<8} {:<32} {:>8}  {:<16}  {}",
            c.id,
            c.file_path,
            c.chunk_size,
            format_ts_relative(c.created_at),
            c.model_name
        );
    }
    println!();
    println!("{} chunk(s)", chunks.len());
    Ok(())
}

pub async fn run_documents(rag: &DynaRag, caller: &Caller) -> Result<()> {
    let documents = rag.list_documents(caller).await?;
    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("  {:<40} {:>10}  {}", "FILE", "SIZE", "UPDATED");
    println!("  {}", "-".repeat(68));
    for d in &documents {
        println!(
            "  {:<40} {:>10}  {}",
            d.file_path,
            format_bytes(d.total_chunk_size.max(0) as u64),
            format_ts_relative(d.updated_at)
        );
    }
    Ok(())
}

pub async fn run_purge(rag: &DynaRag, caller: &Caller, dry_run: bool) -> Result<()> {
    let stats = rag.purge(caller, dry_run).await?;

    if dry_run {
        println!("purge {} (dry-run)", caller.owner_scope);
    } else {
        println!("purge {}", caller.owner_scope);
    }
    println!("  embeddings: {}", stats.embedding_count);
    println!("  documents: {}", stats.document_count);
    println!("  bytes: {}", format_bytes(stats.total_bytes.max(0) as u64));
    for path in &stats.file_paths {
        println!("    - {}", path);
    }
    println!("ok");
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an epoch-millisecond timestamp relative to now ("3 hours ago").
fn format_ts_relative(ts_ms: i64) -> String {
    let delta = (chrono::Utc::now().timestamp_millis() - ts_ms) / 1000;

    if delta < 0 {
        format_ts_iso(ts_ms)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_ms)
    }
}

fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(12), "12 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp_millis();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 2 * 3600 * 1000), "2 hours ago");
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
