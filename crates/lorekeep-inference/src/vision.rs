//! OCR and image-caption provider clients.
//!
//! Both speak a minimal internal contract: POST the raw image bytes with its
//! content type, get a small JSON body back. The index pipeline treats these
//! as best-effort enrichment, so failures here degrade an item's index text
//! rather than failing the job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;

use lorekeep_core::{defaults, Error, OcrProvider, Result, VisionProvider};

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    description: String,
}

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(defaults::EXTRACTION_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Internal(format!("http client init: {e}")))
}

/// OCR provider posting images to `{base}/v1/ocr`.
pub struct HttpOcrProvider {
    client: Client,
    base_url: String,
}

impl HttpOcrProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OcrProvider for HttpOcrProvider {
    async fn extract_text(&self, image: &[u8], mime_type: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/v1/ocr", self.base_url))
            .header(CONTENT_TYPE, mime_type)
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| Error::Extraction(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Extraction(format!("ocr status {}", resp.status())));
        }
        let parsed: OcrResponse = resp
            .json()
            .await
            .map_err(|e| Error::Extraction(e.to_string()))?;
        Ok(parsed.text)
    }
}

/// Caption provider posting images to `{base}/v1/describe`.
pub struct HttpVisionProvider {
    client: Client,
    base_url: String,
}

impl HttpVisionProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VisionProvider for HttpVisionProvider {
    async fn describe(&self, image: &[u8], mime_type: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/v1/describe", self.base_url))
            .header(CONTENT_TYPE, mime_type)
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| Error::Extraction(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Extraction(format!(
                "describe status {}",
                resp.status()
            )));
        }
        let parsed: CaptionResponse = resp
            .json()
            .await
            .map_err(|e| Error::Extraction(e.to_string()))?;
        Ok(parsed.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_ocr_posts_raw_bytes_with_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/ocr"))
            .and(header("content-type", "image/png"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "text": "scanned words" })),
            )
            .mount(&server)
            .await;

        let provider = HttpOcrProvider::new(&server.uri()).unwrap();
        let text = provider.extract_text(&[1, 2, 3], "image/png").await.unwrap();
        assert_eq!(text, "scanned words");
    }

    #[tokio::test]
    async fn test_vision_failure_is_extraction_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/describe"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = HttpVisionProvider::new(&server.uri()).unwrap();
        let err = provider.describe(&[1], "image/jpeg").await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_vision_returns_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/describe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "description": "a whiteboard covered in diagrams"
            })))
            .mount(&server)
            .await;

        let provider = HttpVisionProvider::new(&server.uri()).unwrap();
        let caption = provider.describe(&[1], "image/jpeg").await.unwrap();
        assert!(caption.contains("whiteboard"));
    }
}
