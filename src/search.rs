//! `dynarag similar` and `dynarag query`.

use anyhow::Result;
use tokio::io::AsyncWriteExt;

use dynarag_core::models::ChunkMatch;

use crate::client::{Caller, DynaRag};
use crate::ingest::parse_metadata_arg;

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

fn print_matches(matches: &[ChunkMatch]) {
    for (i, m) in matches.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, m.similarity, m.file_path);
        println!("    distance: {:.4}", m.distance);
        println!("    excerpt: \"{}\"", excerpt(&m.chunk_text, 160));
        if m.metadata.as_object().map_or(false, |o| !o.is_empty()) {
            println!("    metadata: {}", m.metadata);
        }
        println!("    id: {}", m.id);
        println!();
    }
}

pub async fn run_similar(
    rag: &DynaRag,
    caller: &Caller,
    text: &str,
    k: Option<i64>,
    metadata: Option<&str>,
) -> Result<()> {
    let filter = parse_metadata_arg(metadata)?;
    let matches = rag.similar(caller, text, k, filter.as_ref()).await?;
    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }
    print_matches(&matches);
    Ok(())
}

/// Stream an answer to stdout, then list the sources it drew on.
pub async fn run_query(
    rag: &DynaRag,
    caller: &Caller,
    text: &str,
    k: Option<i64>,
    metadata: Option<&str>,
) -> Result<()> {
    let filter = parse_metadata_arg(metadata)?;
    let mut stdout = tokio::io::stdout();
    let sources = rag
        .query(caller, text, k, filter.as_ref(), &mut stdout)
        .await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    if !sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, m) in sources.iter().enumerate() {
            println!("  [{}] {} ({:.4})", i + 1, m.file_path, m.similarity);
        }
    }
    Ok(())
}
