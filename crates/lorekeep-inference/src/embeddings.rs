//! OpenAI-compatible embedding client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use lorekeep_core::{defaults, EmbeddingProvider, Error, Result};

use crate::settings::EmbedSettings;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding provider backed by an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    client: Client,
    settings: EmbedSettings,
}

impl HttpEmbeddingProvider {
    pub fn new(settings: EmbedSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::EMBED_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("http client init: {e}")))?;
        Ok(Self { client, settings })
    }

    /// Vector size this provider is configured for.
    pub fn dimension(&self) -> usize {
        self.settings.dimension
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v1/embeddings",
            self.settings.base_url.trim_end_matches('/')
        );
        let mut request = self.client.post(&url).json(&json!({
            "model": self.settings.model,
            "input": texts,
        }));
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::EmbeddingFailed {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse = resp.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(Error::EmbeddingFailed {
                status: status.as_u16(),
                body: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        // Providers may return rows out of order; the index field is canonical.
        parsed.data.sort_by_key(|row| row.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|row| row.embedding).collect();
        if vectors.iter().any(|v| v.is_empty()) {
            return Err(Error::EmbeddingEmpty);
        }

        debug!(
            subsystem = "inference",
            component = "embeddings",
            chunk_count = vectors.len(),
            "Embedded batch"
        );
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: String) -> EmbedSettings {
        EmbedSettings {
            base_url,
            model: "test-embed".to_string(),
            api_key: None,
            dimension: 3,
        }
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({ "model": "test-embed" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "index": 1, "embedding": [0.4, 0.5, 0.6] },
                    { "index": 0, "embedding": [0.1, 0.2, 0.3] }
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(settings(server.uri())).unwrap();
        let vectors = provider
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
        assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn test_embed_surfaces_provider_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(settings(server.uri())).unwrap();
        let err = provider.embed(&["text".to_string()]).await.unwrap_err();
        match err {
            Error::EmbeddingFailed { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_vectors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [ { "index": 0, "embedding": [] } ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(settings(server.uri())).unwrap();
        let err = provider.embed(&["text".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingEmpty));
    }

    #[tokio::test]
    async fn test_embed_rejects_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [ { "index": 0, "embedding": [0.1] } ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(settings(server.uri())).unwrap();
        let err = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingFailed { .. }));
    }

    #[tokio::test]
    async fn test_embed_query_returns_single_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [ { "index": 0, "embedding": [1.0, 0.0, 0.0] } ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(settings(server.uri())).unwrap();
        let vector = provider.embed_query("query").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_embed_empty_batch_is_noop() {
        let provider =
            HttpEmbeddingProvider::new(settings("http://127.0.0.1:1".to_string())).unwrap();
        assert!(provider.embed(&[]).await.unwrap().is_empty());
    }
}
