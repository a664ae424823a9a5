//! Core traits for lorekeep abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ExtractedSource;

/// Generates embedding vectors for text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors.pop().ok_or(crate::error::Error::EmbeddingEmpty)
    }
}

/// Scores query/document relevance for second-stage reranking.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Score each document against the query. Returns `(input_index, score)`
    /// pairs sorted by descending score.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<(usize, f32)>>;
}

/// Extracts text from raster images of documents.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn extract_text(&self, image: &[u8], mime_type: &str) -> Result<String>;
}

/// Describes image content in natural language.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn describe(&self, image: &[u8], mime_type: &str) -> Result<String>;
}

/// Parses a binary document format into indexable text sources.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// MIME types this parser accepts.
    fn supported_types(&self) -> &[&str];

    /// Extract one source per logical unit (page, sheet, slide).
    async fn parse(&self, data: &[u8], filename: &str) -> Result<Vec<ExtractedSource>>;
}
