//! Lexical full-text search over notebook chunks.

use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lorekeep_core::{ChunkHit, Error, Result, RetrievalScope, SourceType};

/// Full-text chunk search using PostgreSQL tsvector.
pub struct PgChunkSearch {
    pool: Pool<Postgres>,
}

/// SQL predicate restricting hits to what the querying user may see.
/// Expects the item table aliased `i` with the user id bound at `$2`.
pub(crate) fn scope_clause(scope: RetrievalScope) -> &'static str {
    match scope {
        RetrievalScope::Personal => "i.owner_user_id = $2",
        RetrievalScope::Company => "i.source_scope = 'company'",
        RetrievalScope::All => "(i.owner_user_id = $2 OR i.source_scope = 'company')",
    }
}

impl PgChunkSearch {
    /// Create a new PgChunkSearch with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Rank active chunks against `query` within one tenant and scope.
    ///
    /// Uses `websearch_to_tsquery` so users get phrase/OR/NOT operators, and
    /// `ts_rank` with normalization flag 32 (rank / (rank + 1)) so scores land
    /// in `[0, 1)` and are comparable across queries. That bounded range is
    /// what the strong-signal shortcut thresholds in lorekeep-search assume.
    pub async fn search(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        scope: RetrievalScope,
        query: &str,
        limit: i64,
    ) -> Result<Vec<ChunkHit>> {
        let sql = format!(
            r#"
            SELECT c.item_id,
                   c.chunk_index,
                   ts_rank(c.tsv, websearch_to_tsquery('english', $3), 32) AS score,
                   c.chunk_text,
                   c.source_type,
                   c.source_locator
            FROM notebook_chunk c
            JOIN notebook_item i ON i.id = c.item_id
            WHERE i.company_id = $1
              AND i.status = 'active'
              AND {}
              AND c.tsv @@ websearch_to_tsquery('english', $3)
            ORDER BY score DESC
            LIMIT $4
            "#,
            scope_clause(scope)
        );

        let rows = sqlx::query(&sql)
            .bind(company_id)
            .bind(user_id)
            .bind(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let hits = rows
            .into_iter()
            .map(|row| ChunkHit {
                item_id: row.get("item_id"),
                chunk_index: row.get("chunk_index"),
                score: row.get::<Option<f32>, _>("score").unwrap_or(0.0),
                text: row.get("chunk_text"),
                source_type: SourceType::parse(row.get("source_type")),
                source_locator: row.get("source_locator"),
            })
            .collect();

        Ok(hits)
    }
}
