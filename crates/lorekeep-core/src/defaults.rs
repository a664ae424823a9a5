//! Default values and tunable policy constants shared across crates.
//!
//! Retrieval thresholds and blend weights are policy, not architecture: they
//! were tuned against production traffic and can be revisited without touching
//! the engine.

// ─── Chunking ──────────────────────────────────────────────────────────────

/// Default chunk target size in characters.
pub const CHUNK_SIZE: usize = 1000;

/// Default overlap carried between adjacent chunks, in characters.
pub const CHUNK_OVERLAP: usize = 200;

/// Smallest permitted chunk target; smaller requests are clamped up.
pub const CHUNK_MIN_TARGET: usize = 100;

/// Clamp bounds for the delimiter/packed strategy.
pub const PACKED_MIN_SIZE: usize = 300;
pub const PACKED_MAX_SIZE: usize = 2000;

// ─── Retrieval ─────────────────────────────────────────────────────────────

/// RRF constant. K=60 per Cormack et al. (2009).
pub const RRF_K: f32 = 60.0;

/// RRF list weight for vector-search candidates.
pub const RRF_VECTOR_WEIGHT: f32 = 1.2;

/// RRF list weight for lexical candidates.
pub const RRF_LEXICAL_WEIGHT: f32 = 1.0;

/// Lexical score at or above which the strong-signal shortcut may fire.
pub const LEXICAL_SHORTCUT_SCORE: f32 = 0.82;

/// Minimum lead over the second-best lexical hit for the shortcut.
pub const LEXICAL_SHORTCUT_GAP: f32 = 0.12;

/// Retrieval-score blend weight for the reranker's top 3 positions.
pub const BLEND_WEIGHT_TOP: f32 = 0.75;

/// Retrieval-score blend weight for reranked positions 4-10.
pub const BLEND_WEIGHT_MID: f32 = 0.60;

/// Retrieval-score blend weight beyond position 10.
pub const BLEND_WEIGHT_TAIL: f32 = 0.40;

/// Floor on the rerank candidate set size.
pub const RERANK_MIN_CANDIDATES: usize = 12;

// ─── Jobs ──────────────────────────────────────────────────────────────────

/// Polling interval when the job queue is empty (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Jobs claimed per poll cycle; run sequentially within one worker.
pub const JOB_POLL_BATCH: i64 = 4;

/// Blocking-pop timeout for the distributed queue (seconds).
pub const QUEUE_POP_TIMEOUT_SECS: u64 = 5;

/// Default redis list key for the fast-path job queue.
pub const QUEUE_KEY: &str = "lorekeep:index_jobs";

// ─── Sync ──────────────────────────────────────────────────────────────────

/// Page limit for sync_pull.
pub const SYNC_PULL_PAGE_LIMIT: i64 = 200;

// ─── Providers ─────────────────────────────────────────────────────────────

/// Timeout for embedding requests (seconds).
pub const EMBED_TIMEOUT_SECS: u64 = 60;

/// Timeout for rerank requests (seconds).
pub const RERANK_TIMEOUT_SECS: u64 = 30;

/// Timeout for vector-store requests (seconds).
pub const VECTOR_TIMEOUT_SECS: u64 = 30;

/// Timeout for OCR and caption requests (seconds).
pub const EXTRACTION_TIMEOUT_SECS: u64 = 30;
