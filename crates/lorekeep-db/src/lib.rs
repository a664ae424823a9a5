//! # lorekeep-db
//!
//! PostgreSQL database layer for lorekeep.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for items, chunks, index jobs, and sync ops
//! - Full-text chunk search with PostgreSQL tsvector
//!
//! ## Example
//!
//! ```rust,ignore
//! use lorekeep_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/lorekeep").await?;
//!     let pending = db.jobs.pending_count().await?;
//!     println!("{pending} jobs waiting");
//!     Ok(())
//! }
//! ```

pub mod chunks;
pub mod items;
pub mod jobs;
pub mod pool;
pub mod search;
pub mod sync_ops;

// Re-export core types
pub use lorekeep_core::*;

pub use chunks::{NewChunk, PgChunkRepository};
pub use items::{CreateItemFileParams, CreateItemParams, ItemPatch, PgItemRepository};
pub use jobs::{EnqueueJobParams, PgIndexJobRepository};
pub use pool::{create_pool, PoolConfig};
pub use search::PgChunkSearch;
pub use sync_ops::{NewSyncOp, PgSyncOpRepository};

use sqlx::{Pool, Postgres};

/// Aggregate handle bundling every repository over one shared pool.
pub struct Database {
    pub pool: Pool<Postgres>,
    pub items: PgItemRepository,
    pub chunks: PgChunkRepository,
    pub jobs: PgIndexJobRepository,
    pub sync_ops: PgSyncOpRepository,
    pub search: PgChunkSearch,
}

impl Database {
    /// Build the repository set over an existing pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            items: PgItemRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            jobs: PgIndexJobRepository::new(pool.clone()),
            sync_ops: PgSyncOpRepository::new(pool.clone()),
            search: PgChunkSearch::new(pool.clone()),
            pool,
        }
    }

    /// Connect with pool sizing taken from the environment.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_config(database_url, PoolConfig::from_env()).await
    }

    /// Connect with explicit pool sizing.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        Ok(Self::new(create_pool(database_url, config).await?))
    }
}
