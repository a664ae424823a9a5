//! Sync operation audit log repository.
//!
//! Every pushed client operation is recorded here before it is applied, so
//! duplicate deliveries can be answered idempotently and conflicted ops keep a
//! snapshot of the server state they lost against.

use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lorekeep_core::{
    new_v7, Error, Result, SyncEntityType, SyncOp, SyncOpStatus, SyncOpType,
};

/// Parameters for recording a pushed operation.
#[derive(Debug, Clone)]
pub struct NewSyncOp {
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub client_op_id: String,
    pub entity_type: SyncEntityType,
    pub entity_id: Uuid,
    pub op_type: SyncOpType,
    pub op_payload: JsonValue,
    pub base_revision: i64,
}

/// PostgreSQL repository for the sync operation log.
pub struct PgSyncOpRepository {
    pool: Pool<Postgres>,
}

const SYNC_OP_COLUMNS: &str = "id, company_id, user_id, device_id, client_op_id, entity_type, \
     entity_id, op_type, op_payload, base_revision, status, conflict_copy, applied_at, created_at";

impl PgSyncOpRepository {
    /// Create a new PgSyncOpRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_op_row(row: sqlx::postgres::PgRow) -> SyncOp {
        SyncOp {
            id: row.get("id"),
            company_id: row.get("company_id"),
            user_id: row.get("user_id"),
            device_id: row.get("device_id"),
            client_op_id: row.get("client_op_id"),
            entity_type: SyncEntityType::parse(row.get("entity_type")),
            entity_id: row.get("entity_id"),
            op_type: SyncOpType::parse(row.get("op_type")),
            op_payload: row.get("op_payload"),
            base_revision: row.get("base_revision"),
            status: SyncOpStatus::parse(row.get("status")),
            conflict_copy: row.get("conflict_copy"),
            applied_at: row.get("applied_at"),
            created_at: row.get("created_at"),
        }
    }

    /// Record a pushed op in pending state, before any entity mutation.
    pub async fn insert(&self, params: NewSyncOp) -> Result<SyncOp> {
        let id = new_v7();
        let sql = format!(
            "INSERT INTO sync_op \
                 (id, company_id, user_id, device_id, client_op_id, entity_type, entity_id, \
                  op_type, op_payload, base_revision, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', now()) \
             RETURNING {SYNC_OP_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(params.company_id)
            .bind(params.user_id)
            .bind(&params.device_id)
            .bind(&params.client_op_id)
            .bind(params.entity_type.as_str())
            .bind(params.entity_id)
            .bind(params.op_type.as_str())
            .bind(&params.op_payload)
            .bind(params.base_revision)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(Self::parse_op_row(row))
    }

    /// Look up a previously pushed op by its client-assigned id, within one
    /// tenant and user. Duplicate pushes hit this and short-circuit.
    pub async fn find_by_client_op(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        client_op_id: &str,
    ) -> Result<Option<SyncOp>> {
        let sql = format!(
            "SELECT {SYNC_OP_COLUMNS} FROM sync_op \
             WHERE company_id = $1 AND user_id = $2 AND client_op_id = $3"
        );
        let row = sqlx::query(&sql)
            .bind(company_id)
            .bind(user_id)
            .bind(client_op_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(Self::parse_op_row))
    }

    /// Mark an op as applied.
    pub async fn mark_applied(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE sync_op SET status = 'applied', applied_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Mark an op as conflicted, preserving the server-side state it lost to.
    pub async fn mark_conflict(&self, id: Uuid, server_copy: &JsonValue) -> Result<()> {
        sqlx::query(
            "UPDATE sync_op SET status = 'conflict', conflict_copy = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(server_copy)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Mark an op as rejected.
    pub async fn mark_rejected(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE sync_op SET status = 'rejected' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Recent ops pushed by a device, newest first. Operator diagnostics.
    pub async fn list_for_device(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncOp>> {
        let sql = format!(
            "SELECT {SYNC_OP_COLUMNS} FROM sync_op \
             WHERE company_id = $1 AND user_id = $2 AND device_id = $3 \
             ORDER BY created_at DESC \
             LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(company_id)
            .bind(user_id)
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_op_row).collect())
    }
}
