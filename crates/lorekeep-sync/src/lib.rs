//! # lorekeep-sync
//!
//! Offline-sync reconciliation: clients push batches of mutations recorded
//! while disconnected, the server applies them under optimistic concurrency,
//! and pull paging lets clients catch up on server-side changes.
//!
//! Conflicts resolve last-writer-wins with a copy: the server state stands,
//! and the losing client intent is preserved on the recorded op row.

pub mod reconciler;

pub use reconciler::{SyncReconciler, SyncStore};
