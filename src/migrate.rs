//! Idempotent schema setup.
//!
//! Two tables: `documents`, one row per `(owner_scope, file_path)`, and
//! `embeddings`, one row per ingested chunk. Timestamps are epoch
//! milliseconds; vectors are little-endian f32 BLOBs.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an already-open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_scope TEXT NOT NULL,
            file_path TEXT NOT NULL,
            total_chunk_size INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(owner_scope, file_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL,
            model_name TEXT NOT NULL,
            chunk_text TEXT NOT NULL,
            embedding_text TEXT,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            chunk_size INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            metadata_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_scope)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_document_id ON embeddings(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_metadata_hash ON embeddings(metadata_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_created_at ON embeddings(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
