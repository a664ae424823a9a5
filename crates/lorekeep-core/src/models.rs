//! Core data model: notebook items, chunks, index jobs, and sync ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// ─── Enums ─────────────────────────────────────────────────────────────────

/// Visibility scope of a notebook item within its tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceScope {
    /// Visible to the owning user only.
    #[default]
    Personal,
    /// Visible to every user in the company.
    Company,
}

impl SourceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Company => "company",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "company" => Self::Company,
            _ => Self::Personal,
        }
    }
}

/// Kind of knowledge unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// Markdown note.
    #[default]
    Text,
    /// File-backed item (attachments carry the content).
    File,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "file" => Self::File,
            _ => Self::Text,
        }
    }
}

/// Indexing state of an item. Driven only by the indexing pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    /// Item is not indexable; chunks and vectors were removed.
    Skipped,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

/// Soft-delete lifecycle state. Rows are never hard-deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Active,
    Deleted,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "deleted" => Self::Deleted,
            _ => Self::Active,
        }
    }
}

/// Kind of asynchronous index work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexJobType {
    /// (Re)derive chunks and vectors for one item.
    Upsert,
    /// Remove chunks and vectors for one item.
    Delete,
    /// Full re-derivation requested explicitly (same path as upsert).
    Reindex,
}

impl IndexJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::Reindex => "reindex",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delete" => Self::Delete,
            "reindex" => Self::Reindex,
            _ => Self::Upsert,
        }
    }
}

/// Index job state machine: pending → running → {success|failed}.
/// Terminal states are externally resettable to pending via retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexJobStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl IndexJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Whether the job has finished and may be reset to pending by a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Where a chunk's text came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Inline title + markdown body.
    #[default]
    Note,
    /// Extracted from a document file (PDF, DOCX, ...).
    Document,
    /// Extracted from tabular data (CSV, XLSX).
    Spreadsheet,
    /// OCR text and vision captions from an image attachment.
    Image,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Document => "document",
            Self::Spreadsheet => "spreadsheet",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "document" => Self::Document,
            "spreadsheet" => Self::Spreadsheet,
            "image" => Self::Image,
            _ => Self::Note,
        }
    }
}

// ─── Media ─────────────────────────────────────────────────────────────────

/// Descriptor for attached media. Stored as JSONB; bytes live in blob storage
/// addressed by `storage_ref`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub storage_ref: Option<String>,
}

// ─── Entities ──────────────────────────────────────────────────────────────

/// One knowledge unit owned by a user within a tenant.
///
/// `revision` strictly increases on every mutating write visible to sync.
/// `index_status` transitions are driven only by the indexing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookItem {
    pub id: Uuid,
    pub company_id: Uuid,
    pub owner_user_id: Uuid,
    pub source_scope: SourceScope,
    pub title: String,
    pub content_markdown: String,
    pub item_type: ItemType,
    /// Legacy inline media reference; discrete attachments live in
    /// `NotebookItemFile` rows.
    pub media: Option<MediaDescriptor>,
    pub is_indexable: bool,
    pub index_status: IndexStatus,
    pub index_error: Option<String>,
    pub status: ItemStatus,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A discrete file attachment. Multiple active files may feed one item's index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookItemFile {
    pub id: Uuid,
    pub item_id: Uuid,
    pub media: MediaDescriptor,
    pub is_indexable: bool,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

/// Derived, disposable chunk row. The chunk set for an item is always fully
/// replaced on each successful index run — never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookChunk {
    pub id: Uuid,
    pub item_id: Uuid,
    /// 0-based, contiguous per extraction pass across all of the item's sources.
    pub chunk_index: i32,
    pub chunk_text: String,
    /// Estimated: ⌈chars / 4⌉.
    pub token_count: i32,
    /// Hex SHA-256 of the trimmed chunk text.
    pub content_hash: String,
    pub source_type: SourceType,
    /// Human-addressable pointer, e.g. "sheet:2 rows 10-40" or "pages 3-5".
    pub source_locator: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Optional per-job chunking overrides; tenant defaults apply when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkOverrides {
    pub strategy: Option<String>,
    pub size: Option<i32>,
    pub separator: Option<String>,
}

impl ChunkOverrides {
    pub fn is_empty(&self) -> bool {
        self.strategy.is_none() && self.size.is_none() && self.separator.is_none()
    }
}

/// A unit of asynchronous index work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJob {
    pub id: Uuid,
    pub company_id: Uuid,
    pub owner_user_id: Uuid,
    pub item_id: Uuid,
    pub job_type: IndexJobType,
    pub status: IndexJobStatus,
    pub error_message: Option<String>,
    pub overrides: Option<ChunkOverrides>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ─── Sync protocol ─────────────────────────────────────────────────────────

/// Entity addressed by a sync op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntityType {
    Item,
    ItemFile,
}

impl SyncEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::ItemFile => "item_file",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "item_file" => Self::ItemFile,
            _ => Self::Item,
        }
    }
}

/// Mutation kind carried by a sync op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOpType {
    Create,
    Update,
    Delete,
}

impl SyncOpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "create" => Self::Create,
            "delete" => Self::Delete,
            _ => Self::Update,
        }
    }
}

/// Server-side state of a recorded sync op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOpStatus {
    #[default]
    Pending,
    Applied,
    Conflict,
    Rejected,
}

impl SyncOpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "applied" => Self::Applied,
            "conflict" => Self::Conflict,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// A recorded client-originated mutation. `client_op_id` is the idempotency
/// key, unique per company+user; replays short-circuit without reapplying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOp {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub client_op_id: String,
    pub entity_type: SyncEntityType,
    pub entity_id: Uuid,
    pub op_type: SyncOpType,
    pub op_payload: JsonValue,
    /// Revision the client based its edit on; 0 means "no expectation".
    pub base_revision: i64,
    pub status: SyncOpStatus,
    /// Snapshot of server state plus the client's intended payload, preserved
    /// under LWW_WITH_COPY when the op conflicted.
    pub conflict_copy: Option<JsonValue>,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One op as submitted by a client in a sync batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPushOp {
    pub client_op_id: String,
    pub entity_type: SyncEntityType,
    pub entity_id: Uuid,
    pub op_type: SyncOpType,
    #[serde(default)]
    pub op_payload: JsonValue,
    #[serde(default)]
    pub base_revision: i64,
}

/// Per-op outcome reported back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncOutcome {
    /// Op applied; `revision` is the server's new authoritative revision.
    Applied { revision: i64 },
    /// `client_op_id` was seen before; nothing was reapplied.
    Duplicate,
    /// Revision mismatch; the client's intent is preserved at `conflict_copy_id`.
    Conflict {
        server_revision: i64,
        conflict_copy_id: Uuid,
    },
    /// Validation failed before any side effect.
    Rejected { reason: String },
}

/// Result row for one op in an apply_batch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOpResult {
    pub client_op_id: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// One page of server-side changes for sync_pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPullPage {
    pub items: Vec<NotebookItem>,
    pub next_cursor: Option<DateTime<Utc>>,
    pub has_more: bool,
}

// ─── Extraction & retrieval ────────────────────────────────────────────────

/// One extracted text stream from an item or attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSource {
    pub text: String,
    pub source_type: SourceType,
    pub source_locator: Option<String>,
}

/// Retrieval visibility requested by a search caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalScope {
    /// Only the caller's personal items.
    Personal,
    /// Only company-wide items.
    Company,
    /// Personal items plus company-wide items.
    #[default]
    All,
}

/// A scored chunk candidate from one retrieval list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub item_id: Uuid,
    pub chunk_index: i32,
    pub score: f32,
    pub text: String,
    pub source_type: SourceType,
    pub source_locator: Option<String>,
}

/// A ranked passage returned by the hybrid engine, with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPassage {
    pub item_id: Uuid,
    pub chunk_index: i32,
    pub title: String,
    pub snippet: String,
    pub source_type: SourceType,
    pub source_locator: Option<String>,
    pub source_scope: SourceScope,
    pub filename: Option<String>,
    pub score: f32,
}
