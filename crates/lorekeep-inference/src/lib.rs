//! # lorekeep-inference
//!
//! HTTP clients for the AI providers lorekeep depends on: embeddings
//! (mandatory), rerank, OCR, and image captioning (all optional).
//!
//! Concrete types here implement the provider traits from `lorekeep-core`;
//! everything downstream programs against those traits.

pub mod embeddings;
pub mod rerank;
pub mod settings;
pub mod vision;

pub use embeddings::HttpEmbeddingProvider;
pub use rerank::HttpRerankProvider;
pub use settings::{AiSettings, EmbedSettings, RerankSettings};
pub use vision::{HttpOcrProvider, HttpVisionProvider};
