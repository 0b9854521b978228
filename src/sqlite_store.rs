//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the `documents` / `embeddings` schema
//! created by [`migrate`](crate::migrate). Every mutating operation runs in
//! one sqlx transaction; an early return drops the transaction, which rolls
//! it back.
//!
//! Nearest-neighbor search loads the owner's candidate vectors (already
//! narrowed by model and metadata hash in SQL) and ranks them with
//! [`rank_nearest`].

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use dynarag_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use dynarag_core::error::{RagError, RagResult, ResultExt};
use dynarag_core::models::{
    ChunkMatch, ChunkRecord, DeletionStats, Document, Embedding, NewEmbedding, StorageStats,
};
use dynarag_core::store::{rank_nearest, NearestQuery, Store};

const DEP: &str = "sqlite";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_metadata(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        owner_scope: row.get("owner_scope"),
        file_path: row.get("file_path"),
        total_chunk_size: row.get("total_chunk_size"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_embedding(&self, owner: &str, new: &NewEmbedding) -> RagResult<Embedding> {
        let now = now_millis();
        let chunk_size = new.chunk_size();
        let metadata = serde_json::to_string(&new.metadata).dependency(DEP)?;
        let blob = vec_to_blob(&new.vector);

        let mut tx = self.pool.begin().await.dependency(DEP)?;

        let document_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (owner_scope, file_path, total_chunk_size, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            ON CONFLICT(owner_scope, file_path) DO UPDATE SET
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(&new.file_path)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .dependency(DEP)?;

        let embedding_id = sqlx::query(
            r#"
            INSERT INTO embeddings (document_id, model_name, chunk_text, embedding_text,
                                    embedding, dims, chunk_size, metadata, metadata_hash,
                                    created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(&new.model_name)
        .bind(&new.chunk_text)
        .bind(&new.embedding_text)
        .bind(&blob)
        .bind(new.vector.len() as i64)
        .bind(chunk_size)
        .bind(&metadata)
        .bind(&new.metadata_hash)
        .bind(now)
        .execute(&mut *tx)
        .await
        .dependency(DEP)?
        .last_insert_rowid();

        sqlx::query("UPDATE documents SET total_chunk_size = total_chunk_size + ? WHERE id = ?")
            .bind(chunk_size)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .dependency(DEP)?;

        tx.commit().await.dependency(DEP)?;

        Ok(Embedding {
            id: embedding_id,
            document_id,
            model_name: new.model_name.clone(),
            chunk_text: new.chunk_text.clone(),
            embedding_text: new.embedding_text.clone(),
            vector: new.vector.clone(),
            chunk_size,
            metadata: new.metadata.clone(),
            metadata_hash: new.metadata_hash.clone(),
            created_at: now,
        })
    }

    async fn nearest(&self, query: &NearestQuery<'_>) -> RagResult<Vec<ChunkMatch>> {
        if query.k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT e.id, e.document_id, e.chunk_text, e.chunk_size, e.metadata, e.embedding,
                   d.file_path
            FROM embeddings e
            JOIN documents d ON d.id = e.document_id
            WHERE d.owner_scope = ?
              AND e.model_name = ?
              AND (? IS NULL OR e.metadata_hash = ?)
            "#,
        )
        .bind(query.owner)
        .bind(query.model)
        .bind(query.metadata_hash)
        .bind(query.metadata_hash)
        .fetch_all(&self.pool)
        .await
        .dependency(DEP)?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let distance = cosine_distance(query.vector, &blob_to_vec(&blob));
                let metadata: String = row.get("metadata");
                ChunkMatch {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    file_path: row.get("file_path"),
                    chunk_text: row.get("chunk_text"),
                    chunk_size: row.get("chunk_size"),
                    metadata: parse_metadata(&metadata),
                    distance,
                    similarity: 1.0 - distance,
                }
            })
            .collect();

        Ok(rank_nearest(candidates, query.k))
    }

    async fn delete_embeddings(&self, owner: &str, dry_run: bool) -> RagResult<DeletionStats> {
        let mut tx = self.pool.begin().await.dependency(DEP)?;

        let totals = sqlx::query(
            r#"
            SELECT COUNT(e.id) AS embedding_count,
                   COUNT(DISTINCT e.document_id) AS document_count,
                   COALESCE(SUM(e.chunk_size), 0) AS total_bytes
            FROM embeddings e
            JOIN documents d ON d.id = e.document_id
            WHERE d.owner_scope = ?
            "#,
        )
        .bind(owner)
        .fetch_one(&mut *tx)
        .await
        .dependency(DEP)?;

        let file_paths: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT d.file_path
            FROM documents d
            JOIN embeddings e ON e.document_id = d.id
            WHERE d.owner_scope = ?
            ORDER BY d.file_path
            "#,
        )
        .bind(owner)
        .fetch_all(&mut *tx)
        .await
        .dependency(DEP)?;

        let stats = DeletionStats {
            embedding_count: totals.get("embedding_count"),
            document_count: totals.get("document_count"),
            total_bytes: totals.get("total_bytes"),
            file_paths,
        };

        if dry_run {
            tx.rollback().await.dependency(DEP)?;
            return Ok(stats);
        }

        sqlx::query(
            "DELETE FROM embeddings WHERE document_id IN (SELECT id FROM documents WHERE owner_scope = ?)",
        )
        .bind(owner)
        .execute(&mut *tx)
        .await
        .dependency(DEP)?;

        sqlx::query("UPDATE documents SET total_chunk_size = 0 WHERE owner_scope = ?")
            .bind(owner)
            .execute(&mut *tx)
            .await
            .dependency(DEP)?;

        tx.commit().await.dependency(DEP)?;
        Ok(stats)
    }

    async fn list_chunks(
        &self,
        owner: &str,
        metadata_hash: Option<&str>,
    ) -> RagResult<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.document_id, e.chunk_text, e.chunk_size, e.model_name, e.metadata,
                   e.created_at, d.file_path
            FROM embeddings e
            JOIN documents d ON d.id = e.document_id
            WHERE d.owner_scope = ?
              AND (? IS NULL OR e.metadata_hash = ?)
            ORDER BY e.created_at DESC, e.id DESC
            "#,
        )
        .bind(owner)
        .bind(metadata_hash)
        .bind(metadata_hash)
        .fetch_all(&self.pool)
        .await
        .dependency(DEP)?;

        Ok(rows
            .iter()
            .map(|row| {
                let metadata: String = row.get("metadata");
                ChunkRecord {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    file_path: row.get("file_path"),
                    chunk_text: row.get("chunk_text"),
                    chunk_size: row.get("chunk_size"),
                    model_name: row.get("model_name"),
                    metadata: parse_metadata(&metadata),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }

    async fn list_documents(&self, owner: &str) -> RagResult<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_scope, file_path, total_chunk_size, created_at, updated_at
            FROM documents
            WHERE owner_scope = ?
            ORDER BY updated_at DESC, id DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .dependency(DEP)?;

        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn document(&self, owner: &str, file_path: &str) -> RagResult<Document> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_scope, file_path, total_chunk_size, created_at, updated_at
            FROM documents
            WHERE owner_scope = ? AND file_path = ?
            "#,
        )
        .bind(owner)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await
        .dependency(DEP)?;

        row.as_ref()
            .map(document_from_row)
            .ok_or_else(|| RagError::NotFound(format!("document '{}'", file_path)))
    }

    async fn stats(&self, owner: &str) -> RagResult<StorageStats> {
        let document_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE owner_scope = ?")
                .bind(owner)
                .fetch_one(&self.pool)
                .await
                .dependency(DEP)?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(e.id) AS chunk_count, COALESCE(SUM(e.chunk_size), 0) AS total_bytes
            FROM embeddings e
            JOIN documents d ON d.id = e.document_id
            WHERE d.owner_scope = ?
            "#,
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await
        .dependency(DEP)?;

        Ok(StorageStats {
            document_count,
            chunk_count: row.get("chunk_count"),
            total_bytes: row.get("total_bytes"),
        })
    }
}
