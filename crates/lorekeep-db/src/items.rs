//! Notebook item repository implementation.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lorekeep_core::{
    new_v7, Error, IndexStatus, ItemStatus, ItemType, MediaDescriptor, NotebookItem,
    NotebookItemFile, Result, RetrievalScope, SourceScope,
};

/// Parameters for creating a notebook item.
#[derive(Debug, Clone)]
pub struct CreateItemParams {
    /// Explicit id (client-assigned during sync); generated when `None`.
    pub id: Option<Uuid>,
    pub company_id: Uuid,
    pub owner_user_id: Uuid,
    pub source_scope: SourceScope,
    pub title: String,
    pub content_markdown: String,
    pub item_type: ItemType,
    pub media: Option<MediaDescriptor>,
    pub is_indexable: bool,
}

/// Partial update applied to an item. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub content_markdown: Option<String>,
    pub source_scope: Option<SourceScope>,
    pub media: Option<MediaDescriptor>,
    pub is_indexable: Option<bool>,
}

/// Parameters for creating an item file attachment.
#[derive(Debug, Clone)]
pub struct CreateItemFileParams {
    pub id: Option<Uuid>,
    pub item_id: Uuid,
    pub media: MediaDescriptor,
    pub is_indexable: bool,
}

/// PostgreSQL repository for notebook items and their file attachments.
pub struct PgItemRepository {
    pool: Pool<Postgres>,
}

const ITEM_COLUMNS: &str = "id, company_id, owner_user_id, source_scope, title, \
     content_markdown, item_type, media, is_indexable, index_status, index_error, \
     status, revision, created_at, updated_at";

impl PgItemRepository {
    /// Create a new PgItemRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_item_row(row: sqlx::postgres::PgRow) -> NotebookItem {
        let media: Option<JsonValue> = row.get("media");
        NotebookItem {
            id: row.get("id"),
            company_id: row.get("company_id"),
            owner_user_id: row.get("owner_user_id"),
            source_scope: SourceScope::parse(row.get("source_scope")),
            title: row.get("title"),
            content_markdown: row.get("content_markdown"),
            item_type: ItemType::parse(row.get("item_type")),
            media: media.and_then(|v| serde_json::from_value(v).ok()),
            is_indexable: row.get("is_indexable"),
            index_status: IndexStatus::parse(row.get("index_status")),
            index_error: row.get("index_error"),
            status: ItemStatus::parse(row.get("status")),
            revision: row.get("revision"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn parse_file_row(row: sqlx::postgres::PgRow) -> NotebookItemFile {
        let media: JsonValue = row.get("media");
        NotebookItemFile {
            id: row.get("id"),
            item_id: row.get("item_id"),
            media: serde_json::from_value(media).unwrap_or(MediaDescriptor {
                filename: String::new(),
                mime_type: String::new(),
                size_bytes: None,
                storage_ref: None,
            }),
            is_indexable: row.get("is_indexable"),
            status: ItemStatus::parse(row.get("status")),
            created_at: row.get("created_at"),
        }
    }

    /// Insert a new item at revision 1 with a pending index status.
    pub async fn create(&self, params: CreateItemParams) -> Result<NotebookItem> {
        let id = params.id.unwrap_or_else(new_v7);
        let media = params
            .media
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let sql = format!(
            "INSERT INTO notebook_item \
                (id, company_id, owner_user_id, source_scope, title, content_markdown, \
                 item_type, media, is_indexable, index_status, status, revision, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', 'active', 1, now(), now()) \
             RETURNING {ITEM_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(params.company_id)
            .bind(params.owner_user_id)
            .bind(params.source_scope.as_str())
            .bind(&params.title)
            .bind(&params.content_markdown)
            .bind(params.item_type.as_str())
            .bind(media)
            .bind(params.is_indexable)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(Self::parse_item_row(row))
    }

    /// Fetch an item by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<NotebookItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM notebook_item WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(Self::parse_item_row))
    }

    /// Fetch an item by id, failing when absent.
    pub async fn get_required(&self, id: Uuid) -> Result<NotebookItem> {
        self.get(id).await?.ok_or(Error::ItemNotFound(id))
    }

    /// Apply a partial update, bumping the revision. Returns the new revision.
    pub async fn apply_patch(&self, id: Uuid, patch: ItemPatch) -> Result<i64> {
        let media = patch.media.as_ref().map(serde_json::to_value).transpose()?;
        let row = sqlx::query(
            "UPDATE notebook_item SET \
                 title = COALESCE($2, title), \
                 content_markdown = COALESCE($3, content_markdown), \
                 source_scope = COALESCE($4, source_scope), \
                 media = COALESCE($5, media), \
                 is_indexable = COALESCE($6, is_indexable), \
                 revision = revision + 1, \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING revision",
        )
        .bind(id)
        .bind(patch.title)
        .bind(patch.content_markdown)
        .bind(patch.source_scope.map(|s| s.as_str()))
        .bind(media)
        .bind(patch.is_indexable)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|r| r.get("revision")).ok_or(Error::ItemNotFound(id))
    }

    /// Soft-delete an item, bumping the revision. Returns the new revision.
    pub async fn soft_delete(&self, id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "UPDATE notebook_item \
             SET status = 'deleted', revision = revision + 1, updated_at = now() \
             WHERE id = $1 \
             RETURNING revision",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|r| r.get("revision")).ok_or(Error::ItemNotFound(id))
    }

    /// Record the indexing outcome for an item.
    pub async fn set_index_status(
        &self,
        id: Uuid,
        status: IndexStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notebook_item SET index_status = $2, index_error = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Fetch the items among `ids` that are still active, indexable, and
    /// visible to the caller under the requested scope.
    ///
    /// Used to drop retrieval hits whose source item was deleted, opted out
    /// of indexing, or re-scoped out from under the index.
    pub async fn active_by_ids(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        scope: RetrievalScope,
        ids: &[Uuid],
    ) -> Result<Vec<NotebookItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM notebook_item i \
             WHERE i.company_id = $1 AND i.id = ANY($3) \
               AND i.status = 'active' AND i.is_indexable \
               AND {}",
            crate::search::scope_clause(scope)
        );
        let rows = sqlx::query(&sql)
            .bind(company_id)
            .bind(user_id)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_item_row).collect())
    }

    /// Page items changed since `since` for one user's sync stream, ordered by
    /// `(updated_at, id)`. Includes deleted items so clients observe deletions.
    ///
    /// Fetches `limit + 1` rows internally; the caller uses the extra row to
    /// detect a further page.
    pub async fn changed_since(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<NotebookItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM notebook_item \
             WHERE company_id = $1 \
               AND (owner_user_id = $2 OR source_scope = 'company') \
               AND ($3::timestamptz IS NULL OR updated_at > $3) \
             ORDER BY updated_at ASC, id ASC \
             LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(company_id)
            .bind(user_id)
            .bind(since)
            .bind(limit + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_item_row).collect())
    }

    /// Insert a file attachment for an item.
    pub async fn create_file(&self, params: CreateItemFileParams) -> Result<NotebookItemFile> {
        let id = params.id.unwrap_or_else(new_v7);
        let media = serde_json::to_value(&params.media)?;
        let row = sqlx::query(
            "INSERT INTO notebook_item_file (id, item_id, media, is_indexable, status, created_at) \
             VALUES ($1, $2, $3, $4, 'active', now()) \
             RETURNING id, item_id, media, is_indexable, status, created_at",
        )
        .bind(id)
        .bind(params.item_id)
        .bind(media)
        .bind(params.is_indexable)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(Self::parse_file_row(row))
    }

    /// Fetch a file attachment by id.
    pub async fn get_file(&self, id: Uuid) -> Result<Option<NotebookItemFile>> {
        let row = sqlx::query(
            "SELECT id, item_id, media, is_indexable, status, created_at \
             FROM notebook_item_file WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(Self::parse_file_row))
    }

    /// Update a file attachment's media descriptor and indexability.
    pub async fn update_file(
        &self,
        id: Uuid,
        media: Option<&MediaDescriptor>,
        is_indexable: Option<bool>,
    ) -> Result<()> {
        let media = media.map(serde_json::to_value).transpose()?;
        let result = sqlx::query(
            "UPDATE notebook_item_file SET \
                 media = COALESCE($2, media), \
                 is_indexable = COALESCE($3, is_indexable) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(media)
        .bind(is_indexable)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("item file {id}")));
        }
        Ok(())
    }

    /// Soft-delete a file attachment.
    pub async fn delete_file(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE notebook_item_file SET status = 'deleted' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Active, indexable file attachments for an item.
    pub async fn active_files(&self, item_id: Uuid) -> Result<Vec<NotebookItemFile>> {
        let rows = sqlx::query(
            "SELECT id, item_id, media, is_indexable, status, created_at \
             FROM notebook_item_file \
             WHERE item_id = $1 AND status = 'active' AND is_indexable \
             ORDER BY created_at ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_file_row).collect())
    }
}
