//! Chunk repository implementation.

use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lorekeep_core::{new_v7, Error, NotebookChunk, Result, SourceType};

/// A chunk row to be inserted.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub chunk_text: String,
    pub token_count: i32,
    pub content_hash: String,
    pub source_type: SourceType,
    pub source_locator: Option<String>,
}

/// PostgreSQL repository for notebook chunks.
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    /// Create a new PgChunkRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_chunk_row(row: sqlx::postgres::PgRow) -> NotebookChunk {
        NotebookChunk {
            id: row.get("id"),
            item_id: row.get("item_id"),
            chunk_index: row.get("chunk_index"),
            chunk_text: row.get("chunk_text"),
            token_count: row.get("token_count"),
            content_hash: row.get("content_hash"),
            source_type: SourceType::parse(row.get("source_type")),
            source_locator: row.get("source_locator"),
            created_at: row.get("created_at"),
        }
    }

    /// Replace all chunks for an item atomically: delete-then-insert in one
    /// transaction, so readers never observe a partially chunked item.
    pub async fn replace_for_item(
        &self,
        item_id: Uuid,
        chunks: &[NewChunk],
    ) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM notebook_chunk WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = new_v7();
            sqlx::query(
                "INSERT INTO notebook_chunk \
                     (id, item_id, chunk_index, chunk_text, token_count, content_hash, \
                      source_type, source_locator, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())",
            )
            .bind(id)
            .bind(item_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.chunk_text)
            .bind(chunk.token_count)
            .bind(&chunk.content_hash)
            .bind(chunk.source_type.as_str())
            .bind(&chunk.source_locator)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            ids.push(id);
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(ids)
    }

    /// Delete all chunks for an item. Returns the number removed.
    pub async fn delete_for_item(&self, item_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notebook_chunk WHERE item_id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// All chunks for an item, in chunk order.
    pub async fn list_for_item(&self, item_id: Uuid) -> Result<Vec<NotebookChunk>> {
        let rows = sqlx::query(
            "SELECT id, item_id, chunk_index, chunk_text, token_count, content_hash, \
                    source_type, source_locator, created_at \
             FROM notebook_chunk \
             WHERE item_id = $1 \
             ORDER BY chunk_index ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_chunk_row).collect())
    }
}
