//! # lorekeep-index
//!
//! Asynchronous indexing for lorekeep: source extraction, chunking, embedding,
//! vector upsert, and the background worker that drives it all.
//!
//! Jobs live in the `index_job` table and reach workers two ways: interval
//! polling with an atomic batch claim, and an optional redis fast path that
//! carries only job ids. See the `worker` module for the delivery contract.

pub mod extract;
pub mod pipeline;
pub mod queue;
pub mod worker;

pub use extract::{FsMediaStore, MediaFetcher, SourceExtractor};
pub use pipeline::IndexPipeline;
pub use queue::JobQueue;
pub use worker::{IndexWorker, WorkerConfig, WorkerEvent, WorkerHandle};
