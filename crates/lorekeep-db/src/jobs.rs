//! Index job queue repository implementation.
//!
//! The queue is a plain table claimed with `FOR UPDATE SKIP LOCKED`, so any
//! number of workers can poll concurrently without handing the same job to two
//! of them. A distributed fast-path queue (see lorekeep-index) only carries
//! job ids; this table remains the source of truth for job state.

use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lorekeep_core::{
    new_v7, ChunkOverrides, Error, IndexJob, IndexJobStatus, IndexJobType, Result,
};

/// Parameters for enqueueing an index job.
#[derive(Debug, Clone)]
pub struct EnqueueJobParams {
    pub company_id: Uuid,
    pub owner_user_id: Uuid,
    pub item_id: Uuid,
    pub job_type: IndexJobType,
    pub overrides: Option<ChunkOverrides>,
}

/// PostgreSQL repository for the index job queue.
pub struct PgIndexJobRepository {
    pool: Pool<Postgres>,
}

const JOB_COLUMNS: &str = "id, company_id, owner_user_id, item_id, job_type, status, \
     error_message, overrides, started_at, finished_at, created_at";

impl PgIndexJobRepository {
    /// Create a new PgIndexJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> IndexJob {
        let overrides: Option<JsonValue> = row.get("overrides");
        IndexJob {
            id: row.get("id"),
            company_id: row.get("company_id"),
            owner_user_id: row.get("owner_user_id"),
            item_id: row.get("item_id"),
            job_type: IndexJobType::parse(row.get("job_type")),
            status: IndexJobStatus::parse(row.get("status")),
            error_message: row.get("error_message"),
            overrides: overrides.and_then(|v| serde_json::from_value(v).ok()),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            created_at: row.get("created_at"),
        }
    }

    /// Insert a pending job. Returns the stored row.
    pub async fn enqueue(&self, params: EnqueueJobParams) -> Result<IndexJob> {
        let id = new_v7();
        let overrides = params
            .overrides
            .as_ref()
            .filter(|o| !o.is_empty())
            .map(serde_json::to_value)
            .transpose()?;

        let sql = format!(
            "INSERT INTO index_job \
                 (id, company_id, owner_user_id, item_id, job_type, status, overrides, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, now()) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(params.company_id)
            .bind(params.owner_user_id)
            .bind(params.item_id)
            .bind(params.job_type.as_str())
            .bind(overrides)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(Self::parse_job_row(row))
    }

    /// Atomically claim up to `limit` pending jobs, oldest first.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent workers never claim the
    /// same job; the claim and the transition to running are one statement.
    pub async fn claim_batch(&self, limit: i64) -> Result<Vec<IndexJob>> {
        let sql = format!(
            "UPDATE index_job \
             SET status = 'running', started_at = now() \
             WHERE id IN ( \
                 SELECT id FROM index_job \
                 WHERE status = 'pending' \
                 ORDER BY created_at ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_job_row).collect())
    }

    /// Claim one specific job by id, if it is still pending.
    ///
    /// Used by the fast-path queue consumer: a popped id may already have been
    /// claimed by a polling worker, in which case this returns `None` and the
    /// pop is a no-op.
    pub async fn claim_by_id(&self, id: Uuid) -> Result<Option<IndexJob>> {
        let sql = format!(
            "UPDATE index_job \
             SET status = 'running', started_at = now() \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(Self::parse_job_row))
    }

    /// Mark a running job successful.
    pub async fn mark_success(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE index_job SET status = 'success', finished_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Mark a job failed with its error message.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE index_job \
             SET status = 'failed', error_message = $2, finished_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Reset a terminal job (failed or success) back to pending so workers
    /// pick it up again. Fails when the job does not exist or is still in
    /// flight.
    pub async fn retry(&self, id: Uuid) -> Result<IndexJob> {
        let sql = format!(
            "UPDATE index_job \
             SET status = 'pending', error_message = NULL, started_at = NULL, finished_at = NULL \
             WHERE id = $1 AND status IN ('failed', 'success') \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(Self::parse_job_row).ok_or(Error::JobNotFound(id))
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<IndexJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM index_job WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(Self::parse_job_row))
    }

    /// Recent jobs for one item, newest first.
    pub async fn list_for_item(&self, item_id: Uuid, limit: i64) -> Result<Vec<IndexJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM index_job \
             WHERE item_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(item_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_job_row).collect())
    }

    /// Number of jobs still waiting to be claimed.
    pub async fn pending_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM index_job WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("n"))
    }
}
