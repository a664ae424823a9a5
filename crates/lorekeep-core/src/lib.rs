//! # lorekeep-core
//!
//! Core types, traits, and abstractions for the lorekeep knowledge base.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other lorekeep crates depend on.

pub mod chunker;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use chunker::{split, split_with_strategy, ChunkSplit, ChunkStrategy};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;

/// Generate a UUIDv7 (time-ordered). Used for all new row identifiers so
/// creation order is recoverable from the id alone.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
