//! Offline-sync reconciliation with optimistic concurrency.
//!
//! Clients push batches of mutations recorded while offline; each op carries
//! the item revision it was based on. The server is authoritative: an op
//! whose `base_revision` no longer matches loses, but its intent is snapshot
//! into `conflict_copy` (strategy LWW_WITH_COPY) so nothing a user wrote is
//! ever silently dropped. Ops are recorded in the audit log before any entity
//! mutation, so a crash mid-apply still leaves a trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;

use lorekeep_core::{
    defaults, IndexJobType, MediaDescriptor, NotebookItem, NotebookItemFile, Result, SourceScope,
    SyncEntityType, SyncOp, SyncOpResult, SyncOpType, SyncOutcome, SyncPullPage, SyncPushOp,
};
use lorekeep_db::{
    CreateItemFileParams, CreateItemParams, Database, EnqueueJobParams, ItemPatch, NewSyncOp,
};

/// Persistence operations the reconciler needs. `Database` implements this;
/// tests substitute an in-memory store.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn find_op(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        client_op_id: &str,
    ) -> Result<Option<SyncOp>>;
    async fn record_op(&self, op: NewSyncOp) -> Result<SyncOp>;
    async fn op_applied(&self, id: Uuid) -> Result<()>;
    async fn op_conflict(&self, id: Uuid, copy: &JsonValue) -> Result<()>;
    async fn op_rejected(&self, id: Uuid) -> Result<()>;

    async fn get_item(&self, id: Uuid) -> Result<Option<NotebookItem>>;
    async fn create_item(&self, params: CreateItemParams) -> Result<NotebookItem>;
    async fn patch_item(&self, id: Uuid, patch: ItemPatch) -> Result<i64>;
    async fn delete_item(&self, id: Uuid) -> Result<i64>;

    async fn get_file(&self, id: Uuid) -> Result<Option<NotebookItemFile>>;
    async fn create_file(&self, params: CreateItemFileParams) -> Result<NotebookItemFile>;
    async fn update_file(
        &self,
        id: Uuid,
        media: Option<&MediaDescriptor>,
        is_indexable: Option<bool>,
    ) -> Result<()>;
    async fn delete_file(&self, id: Uuid) -> Result<()>;

    async fn changed_since(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<NotebookItem>>;

    /// Queue (re)indexing for an item whose content or indexability changed.
    async fn enqueue_index(&self, item: &NotebookItem, job_type: IndexJobType) -> Result<()>;
}

#[async_trait]
impl SyncStore for Database {
    async fn find_op(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        client_op_id: &str,
    ) -> Result<Option<SyncOp>> {
        self.sync_ops
            .find_by_client_op(company_id, user_id, client_op_id)
            .await
    }

    async fn record_op(&self, op: NewSyncOp) -> Result<SyncOp> {
        self.sync_ops.insert(op).await
    }

    async fn op_applied(&self, id: Uuid) -> Result<()> {
        self.sync_ops.mark_applied(id).await
    }

    async fn op_conflict(&self, id: Uuid, copy: &JsonValue) -> Result<()> {
        self.sync_ops.mark_conflict(id, copy).await
    }

    async fn op_rejected(&self, id: Uuid) -> Result<()> {
        self.sync_ops.mark_rejected(id).await
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<NotebookItem>> {
        self.items.get(id).await
    }

    async fn create_item(&self, params: CreateItemParams) -> Result<NotebookItem> {
        self.items.create(params).await
    }

    async fn patch_item(&self, id: Uuid, patch: ItemPatch) -> Result<i64> {
        self.items.apply_patch(id, patch).await
    }

    async fn delete_item(&self, id: Uuid) -> Result<i64> {
        self.items.soft_delete(id).await
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<NotebookItemFile>> {
        self.items.get_file(id).await
    }

    async fn create_file(&self, params: CreateItemFileParams) -> Result<NotebookItemFile> {
        self.items.create_file(params).await
    }

    async fn update_file(
        &self,
        id: Uuid,
        media: Option<&MediaDescriptor>,
        is_indexable: Option<bool>,
    ) -> Result<()> {
        self.items.update_file(id, media, is_indexable).await
    }

    async fn delete_file(&self, id: Uuid) -> Result<()> {
        self.items.delete_file(id).await
    }

    async fn changed_since(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<NotebookItem>> {
        self.items.changed_since(company_id, user_id, since, limit).await
    }

    async fn enqueue_index(&self, item: &NotebookItem, job_type: IndexJobType) -> Result<()> {
        self.jobs
            .enqueue(EnqueueJobParams {
                company_id: item.company_id,
                owner_user_id: item.owner_user_id,
                item_id: item.id,
                job_type,
                overrides: None,
            })
            .await?;
        Ok(())
    }
}

/// Fields a client may supply when creating an item through sync.
#[derive(Debug, Deserialize)]
struct ItemCreatePayload {
    title: String,
    #[serde(default)]
    content_markdown: String,
    #[serde(default)]
    source_scope: SourceScope,
    #[serde(default)]
    media: Option<MediaDescriptor>,
    #[serde(default = "default_true")]
    is_indexable: bool,
}

/// Fields a client may supply when updating an item through sync.
#[derive(Debug, Default, Deserialize)]
struct ItemUpdatePayload {
    title: Option<String>,
    content_markdown: Option<String>,
    source_scope: Option<SourceScope>,
    media: Option<MediaDescriptor>,
    is_indexable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FileCreatePayload {
    item_id: Uuid,
    media: MediaDescriptor,
    #[serde(default = "default_true")]
    is_indexable: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FileUpdatePayload {
    media: Option<MediaDescriptor>,
    is_indexable: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// Identity of the pushing client for one batch.
#[derive(Debug, Clone, Copy)]
struct BatchContext<'a> {
    company_id: Uuid,
    user_id: Uuid,
    device_id: &'a str,
}

/// The sync reconciler. Ops within a batch apply sequentially, in order.
pub struct SyncReconciler<S: SyncStore> {
    store: S,
}

impl<S: SyncStore> SyncReconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Apply a pushed batch, producing one result per op in input order.
    pub async fn apply_batch(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        device_id: &str,
        ops: &[SyncPushOp],
    ) -> Result<Vec<SyncOpResult>> {
        let ctx = BatchContext {
            company_id,
            user_id,
            device_id,
        };
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let outcome = self.apply_op(ctx, op).await?;
            if let SyncOutcome::Conflict { .. } = outcome {
                warn!(
                    subsystem = "sync",
                    op = "apply_batch",
                    company_id = %company_id,
                    client_op_id = %op.client_op_id,
                    entity_id = %op.entity_id,
                    "Sync op conflicted"
                );
            }
            results.push(SyncOpResult {
                client_op_id: op.client_op_id.clone(),
                outcome,
            });
        }
        info!(
            subsystem = "sync",
            op = "apply_batch",
            company_id = %company_id,
            device_id = %device_id,
            result_count = results.len(),
            "Batch applied"
        );
        Ok(results)
    }

    async fn apply_op(&self, ctx: BatchContext<'_>, op: &SyncPushOp) -> Result<SyncOutcome> {
        // Validation failures must leave no trace, not even an audit row.
        if op.client_op_id.trim().is_empty() {
            return Ok(SyncOutcome::Rejected {
                reason: "client_op_id is required".to_string(),
            });
        }
        if op.entity_id.is_nil() {
            return Ok(SyncOutcome::Rejected {
                reason: "entity_id is required".to_string(),
            });
        }

        if self
            .store
            .find_op(ctx.company_id, ctx.user_id, &op.client_op_id)
            .await?
            .is_some()
        {
            return Ok(SyncOutcome::Duplicate);
        }

        // Audit-first: the op row exists before any entity mutation.
        let recorded = self
            .store
            .record_op(NewSyncOp {
                company_id: ctx.company_id,
                user_id: ctx.user_id,
                device_id: ctx.device_id.to_string(),
                client_op_id: op.client_op_id.clone(),
                entity_type: op.entity_type,
                entity_id: op.entity_id,
                op_type: op.op_type,
                op_payload: op.op_payload.clone(),
                base_revision: op.base_revision,
            })
            .await?;

        match op.entity_type {
            SyncEntityType::Item => self.apply_item_op(ctx, op, &recorded).await,
            SyncEntityType::ItemFile => self.apply_file_op(ctx, op, &recorded).await,
        }
    }

    async fn apply_item_op(
        &self,
        ctx: BatchContext<'_>,
        op: &SyncPushOp,
        recorded: &SyncOp,
    ) -> Result<SyncOutcome> {
        match op.op_type {
            SyncOpType::Create => {
                if let Some(existing) = self.store.get_item(op.entity_id).await? {
                    if existing.company_id != ctx.company_id {
                        return self
                            .reject(recorded, "entity id is taken".to_string())
                            .await;
                    }
                    // Re-creating an existing id is a concurrency collision,
                    // not a validation error; preserve the client's intent.
                    return self.conflict(recorded, &existing, &op.op_payload).await;
                }
                let payload: ItemCreatePayload = match serde_json::from_value(op.op_payload.clone())
                {
                    Ok(payload) => payload,
                    Err(e) => return self.reject(recorded, format!("invalid payload: {e}")).await,
                };
                let item = self
                    .store
                    .create_item(CreateItemParams {
                        id: Some(op.entity_id),
                        company_id: ctx.company_id,
                        owner_user_id: ctx.user_id,
                        source_scope: payload.source_scope,
                        title: payload.title,
                        content_markdown: payload.content_markdown,
                        item_type: if payload.media.is_some() {
                            lorekeep_core::ItemType::File
                        } else {
                            lorekeep_core::ItemType::Text
                        },
                        media: payload.media,
                        is_indexable: payload.is_indexable,
                    })
                    .await?;
                self.store.enqueue_index(&item, IndexJobType::Upsert).await?;
                self.store.op_applied(recorded.id).await?;
                Ok(SyncOutcome::Applied {
                    revision: item.revision,
                })
            }
            SyncOpType::Update | SyncOpType::Delete => {
                let Some(item) = self.store.get_item(op.entity_id).await? else {
                    return self.reject(recorded, "item not found".to_string()).await;
                };
                if item.company_id != ctx.company_id {
                    return self.reject(recorded, "item not found".to_string()).await;
                }
                if op.base_revision != 0 && op.base_revision != item.revision {
                    return self.conflict(recorded, &item, &op.op_payload).await;
                }

                let (revision, job_type) = match op.op_type {
                    SyncOpType::Update => {
                        let payload: ItemUpdatePayload =
                            match serde_json::from_value(op.op_payload.clone()) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    return self
                                        .reject(recorded, format!("invalid payload: {e}"))
                                        .await
                                }
                            };
                        let revision = self
                            .store
                            .patch_item(
                                item.id,
                                ItemPatch {
                                    title: payload.title,
                                    content_markdown: payload.content_markdown,
                                    source_scope: payload.source_scope,
                                    media: payload.media,
                                    is_indexable: payload.is_indexable,
                                },
                            )
                            .await?;
                        (revision, IndexJobType::Upsert)
                    }
                    _ => (self.store.delete_item(item.id).await?, IndexJobType::Delete),
                };
                self.store.enqueue_index(&item, job_type).await?;
                self.store.op_applied(recorded.id).await?;
                Ok(SyncOutcome::Applied { revision })
            }
        }
    }

    /// File ops version against the parent item's revision: attachments have
    /// no counter of their own, and clients edit them as part of the item.
    async fn apply_file_op(
        &self,
        ctx: BatchContext<'_>,
        op: &SyncPushOp,
        recorded: &SyncOp,
    ) -> Result<SyncOutcome> {
        let (parent, action): (NotebookItem, FileAction) = match op.op_type {
            SyncOpType::Create => {
                let payload: FileCreatePayload = match serde_json::from_value(op.op_payload.clone())
                {
                    Ok(payload) => payload,
                    Err(e) => return self.reject(recorded, format!("invalid payload: {e}")).await,
                };
                let Some(parent) = self.store.get_item(payload.item_id).await? else {
                    return self.reject(recorded, "item not found".to_string()).await;
                };
                (parent, FileAction::Create(payload))
            }
            SyncOpType::Update | SyncOpType::Delete => {
                let Some(file) = self.store.get_file(op.entity_id).await? else {
                    return self.reject(recorded, "file not found".to_string()).await;
                };
                let Some(parent) = self.store.get_item(file.item_id).await? else {
                    return self.reject(recorded, "item not found".to_string()).await;
                };
                let action = if op.op_type == SyncOpType::Update {
                    let payload: FileUpdatePayload =
                        match serde_json::from_value(op.op_payload.clone()) {
                            Ok(payload) => payload,
                            Err(e) => {
                                return self
                                    .reject(recorded, format!("invalid payload: {e}"))
                                    .await
                            }
                        };
                    FileAction::Update(payload)
                } else {
                    FileAction::Delete
                };
                (parent, action)
            }
        };

        if parent.company_id != ctx.company_id {
            return self.reject(recorded, "item not found".to_string()).await;
        }
        if op.base_revision != 0 && op.base_revision != parent.revision {
            return self.conflict(recorded, &parent, &op.op_payload).await;
        }

        match action {
            FileAction::Create(payload) => {
                self.store
                    .create_file(CreateItemFileParams {
                        id: Some(op.entity_id),
                        item_id: payload.item_id,
                        media: payload.media,
                        is_indexable: payload.is_indexable,
                    })
                    .await?;
            }
            FileAction::Update(payload) => {
                self.store
                    .update_file(op.entity_id, payload.media.as_ref(), payload.is_indexable)
                    .await?;
            }
            FileAction::Delete => {
                self.store.delete_file(op.entity_id).await?;
            }
        }

        // Attachment changes count as item changes for concurrency and pull.
        let revision = self.store.patch_item(parent.id, ItemPatch::default()).await?;
        self.store
            .enqueue_index(&parent, IndexJobType::Upsert)
            .await?;
        self.store.op_applied(recorded.id).await?;
        Ok(SyncOutcome::Applied { revision })
    }

    async fn reject(&self, recorded: &SyncOp, reason: String) -> Result<SyncOutcome> {
        self.store.op_rejected(recorded.id).await?;
        Ok(SyncOutcome::Rejected { reason })
    }

    async fn conflict(
        &self,
        recorded: &SyncOp,
        server_item: &NotebookItem,
        client_intent: &JsonValue,
    ) -> Result<SyncOutcome> {
        let copy = json!({
            "server": server_item,
            "client_intent": client_intent,
        });
        self.store.op_conflict(recorded.id, &copy).await?;
        Ok(SyncOutcome::Conflict {
            server_revision: server_item.revision,
            conflict_copy_id: recorded.id,
        })
    }

    /// Page through items changed strictly after `cursor`, oldest first.
    pub async fn sync_pull(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        cursor: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<SyncPullPage> {
        let limit = limit
            .unwrap_or(defaults::SYNC_PULL_PAGE_LIMIT)
            .clamp(1, defaults::SYNC_PULL_PAGE_LIMIT);

        let mut items = self
            .store
            .changed_since(company_id, user_id, cursor, limit)
            .await?;
        let has_more = items.len() as i64 > limit;
        items.truncate(limit as usize);
        let next_cursor = items.last().map(|i| i.updated_at);

        Ok(SyncPullPage {
            items,
            next_cursor,
            has_more,
        })
    }
}

enum FileAction {
    Create(FileCreatePayload),
    Update(FileUpdatePayload),
    Delete,
}
