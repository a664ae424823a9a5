//! # lorekeep-search
//!
//! Hybrid retrieval for lorekeep: PostgreSQL full-text candidates fused with
//! vector-store candidates via weighted reciprocal rank fusion, optionally
//! reranked by an external provider.

pub mod hybrid;
pub mod rrf;

pub use hybrid::{
    HybridSearchEngine, ItemLookup, LexicalBackend, SearchContext, VectorBackend,
};
pub use rrf::{fuse, FusedCandidate};
