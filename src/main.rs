//! # DynaRAG CLI (`dynarag`)
//!
//! ## Usage
//!
//! ```bash
//! dynarag --config ./config/dynarag.toml --owner <scope> <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dynarag init` | Create the SQLite database and run schema migrations |
//! | `dynarag chunk <path> <text>` | Embed and store one chunk |
//! | `dynarag batch <file.jsonl>` | Ingest many chunks concurrently |
//! | `dynarag similar "<text>"` | Nearest stored chunks |
//! | `dynarag query "<text>"` | Answer from stored chunks (streams to stdout) |
//! | `dynarag list` | Chunks of the owner, newest first |
//! | `dynarag documents` | Documents of the owner |
//! | `dynarag purge` | Delete the owner's embeddings |
//! | `dynarag stats` | Per-owner counts |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dynarag::client::{Caller, DynaRag};
use dynarag::progress::ProgressMode;
use dynarag::{config, ingest, migrate, search, stats, telemetry};

/// DynaRAG: owner-scoped retrieval-augmented generation over SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dynarag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dynarag",
    about = "DynaRAG: owner-scoped retrieval-augmented generation over SQLite",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dynarag.toml")]
    config: PathBuf,

    /// Owner scope that partitions all data.
    #[arg(long, global = true, default_value = "local")]
    owner: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Embed and store one chunk.
    Chunk {
        /// Document path the chunk belongs to.
        file_path: String,
        /// Chunk text.
        text: String,
        /// Embed this text instead of the chunk text.
        #[arg(long)]
        embed_text: Option<String>,
        /// Metadata as a JSON object.
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Ingest chunks from a JSON Lines file.
    Batch {
        file: PathBuf,
        /// Progress on stderr. Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Find the stored chunks nearest to a text.
    Similar {
        text: String,
        /// Number of results (defaults to `retrieval.default_k`).
        #[arg(short, long)]
        k: Option<i64>,
        /// Only chunks whose metadata equals this JSON object.
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Answer a question from stored chunks.
    Query {
        text: String,
        #[arg(short, long)]
        k: Option<i64>,
        #[arg(long)]
        metadata: Option<String>,
    },

    /// List chunks, newest first.
    List {
        #[arg(long)]
        metadata: Option<String>,
    },

    /// List documents.
    Documents,

    /// Delete every embedding of the owner.
    Purge {
        /// Report what would be deleted without deleting.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show per-owner counts.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let rag = DynaRag::open(cfg).await?;
    let caller = Caller::local(cli.owner);

    let result = match cli.command {
        Commands::Init => Ok(()),
        Commands::Chunk {
            file_path,
            text,
            embed_text,
            metadata,
        } => {
            ingest::run_chunk(&rag, &caller, &file_path, &text, embed_text, metadata.as_deref())
                .await
        }
        Commands::Batch { file, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_batch(&rag, &caller, &file, mode).await
        }
        Commands::Similar { text, k, metadata } => {
            search::run_similar(&rag, &caller, &text, k, metadata.as_deref()).await
        }
        Commands::Query { text, k, metadata } => {
            search::run_query(&rag, &caller, &text, k, metadata.as_deref()).await
        }
        Commands::List { metadata } => stats::run_list(&rag, &caller, metadata.as_deref()).await,
        Commands::Documents => stats::run_documents(&rag, &caller).await,
        Commands::Purge { dry_run } => stats::run_purge(&rag, &caller, dry_run).await,
        Commands::Stats => stats::run_stats(&rag, &caller).await,
    };

    rag.shutdown().await?;
    result
}
