//! Second-stage rerank client (Cohere-style `/v1/rerank` contract).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use lorekeep_core::{defaults, Error, RerankProvider, Result};

use crate::settings::RerankSettings;

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankRow>,
}

#[derive(Debug, Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

/// Rerank provider backed by an HTTP `/v1/rerank` endpoint.
pub struct HttpRerankProvider {
    client: Client,
    settings: RerankSettings,
}

impl HttpRerankProvider {
    pub fn new(settings: RerankSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::RERANK_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("http client init: {e}")))?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl RerankProvider for HttpRerankProvider {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<(usize, f32)>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v1/rerank",
            self.settings.base_url.trim_end_matches('/')
        );
        let mut request = self.client.post(&url).json(&json!({
            "model": self.settings.model,
            "query": query,
            "documents": documents,
            "top_n": documents.len(),
        }));
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::Rerank(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Rerank(format!("status {status}: {body}")));
        }

        let mut parsed: RerankResponse = resp
            .json()
            .await
            .map_err(|e| Error::Rerank(e.to_string()))?;
        for row in &parsed.results {
            if row.index >= documents.len() {
                return Err(Error::Rerank(format!(
                    "result index {} out of range for {} documents",
                    row.index,
                    documents.len()
                )));
            }
        }
        parsed
            .results
            .sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

        debug!(
            subsystem = "inference",
            component = "rerank",
            result_count = parsed.results.len(),
            "Reranked candidates"
        );
        Ok(parsed
            .results
            .into_iter()
            .map(|row| (row.index, row.relevance_score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: String) -> RerankSettings {
        RerankSettings {
            base_url,
            model: "test-rerank".to_string(),
            api_key: None,
        }
    }

    #[tokio::test]
    async fn test_rerank_sorts_by_descending_score() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .and(body_partial_json(json!({ "query": "q" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "index": 0, "relevance_score": 0.2 },
                    { "index": 2, "relevance_score": 0.9 },
                    { "index": 1, "relevance_score": 0.5 }
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpRerankProvider::new(settings(server.uri())).unwrap();
        let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = provider.rerank("q", &docs).await.unwrap();
        assert_eq!(
            ranked.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![2, 1, 0]
        );
    }

    #[tokio::test]
    async fn test_rerank_failure_is_rerank_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = HttpRerankProvider::new(settings(server.uri())).unwrap();
        let err = provider
            .rerank("q", &["a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rerank(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_rerank_rejects_out_of_range_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [ { "index": 7, "relevance_score": 0.9 } ]
            })))
            .mount(&server)
            .await;

        let provider = HttpRerankProvider::new(settings(server.uri())).unwrap();
        let err = provider
            .rerank("q", &["a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rerank(_)));
    }

    #[tokio::test]
    async fn test_rerank_empty_documents_is_noop() {
        let provider =
            HttpRerankProvider::new(settings("http://127.0.0.1:1".to_string())).unwrap();
        assert!(provider.rerank("q", &[]).await.unwrap().is_empty());
    }
}
