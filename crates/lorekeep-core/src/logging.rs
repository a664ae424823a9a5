//! Structured logging schema and field name constants for lorekeep.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation tools can query by standardized names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (hits, chunks) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "search", "db", "inference", "index", "sync", "vector"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "hybrid", "rrf", "pipeline", "worker", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "search", "run_index_job", "apply_batch", "claim"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Tenant (company) UUID.
pub const COMPANY_ID: &str = "company_id";

/// Notebook item UUID being operated on.
pub const ITEM_ID: &str = "item_id";

/// Index job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Index job type enum variant.
pub const JOB_TYPE: &str = "job_type";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search or query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of chunks processed (chunking, embedding, upsert).
pub const CHUNK_COUNT: &str = "chunk_count";

// ─── Search-specific fields ────────────────────────────────────────────────

/// Number of lexical hits before fusion.
pub const LEXICAL_HITS: &str = "lexical_hits";

/// Number of vector hits before fusion.
pub const VECTOR_HITS: &str = "vector_hits";

/// Whether the strong-signal lexical shortcut fired.
pub const SHORTCUT: &str = "shortcut";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
