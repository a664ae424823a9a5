//! # lorekeep-vector
//!
//! Client for the external vector store (Qdrant-compatible REST API).
//!
//! One collection holds every tenant's chunk vectors; tenancy and visibility
//! are enforced with payload filters on every search and delete. Point ids are
//! the chunk row ids, so re-indexing an item naturally overwrites its points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};
use uuid::Uuid;

use lorekeep_core::{
    defaults, ChunkHit, Error, Result, RetrievalScope, SourceScope, SourceType,
};

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "lorekeep_chunks";

/// Payload stored alongside each chunk vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub company_id: Uuid,
    pub owner_user_id: Uuid,
    pub source_scope: SourceScope,
    pub item_id: Uuid,
    pub chunk_index: i32,
    pub content_hash: String,
    pub source_type: SourceType,
    pub source_locator: Option<String>,
    pub text: String,
}

/// A point to upsert: chunk row id, embedding, payload.
#[derive(Debug, Clone, Serialize)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: Option<VectorPayload>,
}

/// REST client for a Qdrant-compatible vector store.
pub struct VectorStore {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
    ready: AtomicBool,
}

impl VectorStore {
    /// Create a client for the given endpoint, collection, and vector size.
    pub fn new(base_url: &str, collection: &str, dimension: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::VECTOR_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::VectorStore(format!("client init: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            dimension,
            ready: AtomicBool::new(false),
        })
    }

    /// Create from `VECTOR_STORE_URL`, `VECTOR_COLLECTION`, `EMBED_DIMENSION`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("VECTOR_STORE_URL")
            .unwrap_or_else(|_| "http://localhost:6333".to_string());
        let collection =
            std::env::var("VECTOR_COLLECTION").unwrap_or_else(|_| DEFAULT_COLLECTION.to_string());
        let dimension = std::env::var("EMBED_DIMENSION")
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Config("EMBED_DIMENSION is required".to_string()))?;
        Self::new(&base_url, &collection, dimension)
    }

    /// Configured vector size.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Verify the collection exists with the configured vector size, creating
    /// it when absent. A size mismatch is fatal: silently writing vectors of
    /// the wrong dimension would corrupt every search.
    pub async fn ensure_collection(&self) -> Result<()> {
        let resp = self.client.get(self.collection_url()).send().await?;

        match resp.status() {
            StatusCode::OK => {
                let info: CollectionInfoResponse = resp.json().await?;
                let actual = info.result.config.params.vectors.size;
                if actual != self.dimension {
                    return Err(Error::VectorStore(format!(
                        "collection '{}' has vector size {} but {} is configured",
                        self.collection, actual, self.dimension
                    )));
                }
                debug!(
                    subsystem = "vector",
                    collection = %self.collection,
                    dimension = self.dimension,
                    "Collection present"
                );
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                info!(
                    subsystem = "vector",
                    collection = %self.collection,
                    dimension = self.dimension,
                    "Creating collection"
                );
                let body = json!({
                    "vectors": { "size": self.dimension, "distance": "Cosine" }
                });
                let resp = self
                    .client
                    .put(self.collection_url())
                    .json(&body)
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(Error::VectorStore(format!(
                        "create collection failed: status {}",
                        resp.status()
                    )));
                }
                Ok(())
            }
            status => Err(Error::VectorStore(format!(
                "collection lookup failed: status {status}"
            ))),
        }
    }

    /// [`ensure_collection`](Self::ensure_collection), skipped once a check
    /// has succeeded. The flag clears when an upsert finds the collection
    /// gone, so a store wiped at runtime gets recreated on the next job.
    pub async fn ensure_collection_cached(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.ensure_collection().await?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Upsert chunk vectors, waiting for the write to be durable before
    /// returning so a success job status never races the store.
    pub async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": points });
        let resp = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            if resp.status() == StatusCode::NOT_FOUND {
                self.ready.store(false, Ordering::Release);
            }
            return Err(Error::VectorStore(format!(
                "upsert failed: status {}",
                resp.status()
            )));
        }
        debug!(
            subsystem = "vector",
            op = "upsert",
            chunk_count = points.len(),
            "Upserted points"
        );
        Ok(())
    }

    /// Remove every vector belonging to one item within one tenant.
    ///
    /// A missing collection is treated as already-clean: delete jobs must
    /// succeed on systems where nothing was ever indexed.
    pub async fn delete_by_item(&self, company_id: Uuid, item_id: Uuid) -> Result<()> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "company_id", "match": { "value": company_id } },
                    { "key": "item_id", "match": { "value": item_id } }
                ]
            }
        });
        let resp = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&body)
            .send()
            .await?;
        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                warn!(
                    subsystem = "vector",
                    op = "delete_by_item",
                    item_id = %item_id,
                    "Collection missing, nothing to delete"
                );
                Ok(())
            }
            status => Err(Error::VectorStore(format!(
                "delete failed: status {status}"
            ))),
        }
    }

    /// Cosine similarity search filtered to one tenant and scope.
    pub async fn search(
        &self,
        query_vector: &[f32],
        company_id: Uuid,
        user_id: Uuid,
        scope: RetrievalScope,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        if query_vector.len() != self.dimension {
            return Err(Error::EmbeddingDimMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }

        let mut must = vec![json!({ "key": "company_id", "match": { "value": company_id } })];
        let mut should: Vec<JsonValue> = Vec::new();
        match scope {
            RetrievalScope::Personal => {
                must.push(json!({ "key": "owner_user_id", "match": { "value": user_id } }));
            }
            RetrievalScope::Company => {
                must.push(json!({ "key": "source_scope", "match": { "value": "company" } }));
            }
            RetrievalScope::All => {
                should.push(json!({ "key": "owner_user_id", "match": { "value": user_id } }));
                should.push(json!({ "key": "source_scope", "match": { "value": "company" } }));
            }
        }

        let mut filter = json!({ "must": must });
        if !should.is_empty() {
            filter["should"] = json!(should);
        }

        let body = json!({
            "vector": query_vector,
            "limit": limit,
            "filter": filter,
            "with_payload": true
        });

        let resp = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::VectorStore(format!(
                "search failed: status {}",
                resp.status()
            )));
        }

        let parsed: SearchResponse = resp.json().await?;
        let hits = parsed
            .result
            .into_iter()
            .filter_map(|point| {
                point.payload.map(|p| ChunkHit {
                    item_id: p.item_id,
                    chunk_index: p.chunk_index,
                    score: point.score,
                    text: p.text,
                    source_type: p.source_type,
                    source_locator: p.source_locator,
                })
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload(item_id: Uuid, chunk_index: i32) -> VectorPayload {
        VectorPayload {
            company_id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            source_scope: SourceScope::Personal,
            item_id,
            chunk_index,
            content_hash: "abc".to_string(),
            source_type: SourceType::Note,
            source_locator: None,
            text: "chunk text".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ensure_collection_accepts_matching_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/lorekeep_chunks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "config": { "params": { "vectors": { "size": 768 } } } }
            })))
            .mount(&server)
            .await;

        let store = VectorStore::new(&server.uri(), "lorekeep_chunks", 768).unwrap();
        store.ensure_collection().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_collection_rejects_dimension_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/lorekeep_chunks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "config": { "params": { "vectors": { "size": 1024 } } } }
            })))
            .mount(&server)
            .await;

        let store = VectorStore::new(&server.uri(), "lorekeep_chunks", 768).unwrap();
        let err = store.ensure_collection().await.unwrap_err();
        assert!(matches!(err, Error::VectorStore(_)));
        assert!(err.to_string().contains("1024"));
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/lorekeep_chunks"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/lorekeep_chunks"))
            .and(body_partial_json(json!({
                "vectors": { "size": 768, "distance": "Cosine" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
            .expect(1)
            .mount(&server)
            .await;

        let store = VectorStore::new(&server.uri(), "lorekeep_chunks", 768).unwrap();
        store.ensure_collection().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_collection_cached_checks_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/lorekeep_chunks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "config": { "params": { "vectors": { "size": 768 } } } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = VectorStore::new(&server.uri(), "lorekeep_chunks", 768).unwrap();
        store.ensure_collection_cached().await.unwrap();
        store.ensure_collection_cached().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_missing_collection_forces_recheck() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/lorekeep_chunks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "config": { "params": { "vectors": { "size": 3 } } } }
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/lorekeep_chunks/points"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = VectorStore::new(&server.uri(), "lorekeep_chunks", 3).unwrap();
        store.ensure_collection_cached().await.unwrap();

        let point = VectorPoint {
            id: Uuid::new_v4(),
            vector: vec![0.1, 0.2, 0.3],
            payload: payload(Uuid::new_v4(), 0),
        };
        assert!(store.upsert(&[point]).await.is_err());

        // The dropped collection cleared the cache: this goes back to the store.
        store.ensure_collection_cached().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_waits_for_durability() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/lorekeep_chunks/points"))
            .and(query_param("wait", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": {} })))
            .expect(1)
            .mount(&server)
            .await;

        let store = VectorStore::new(&server.uri(), "lorekeep_chunks", 3).unwrap();
        let point = VectorPoint {
            id: Uuid::new_v4(),
            vector: vec![0.1, 0.2, 0.3],
            payload: payload(Uuid::new_v4(), 0),
        };
        store.upsert(&[point]).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_empty_is_noop() {
        // No server: an empty batch must not issue a request.
        let store = VectorStore::new("http://127.0.0.1:1", "lorekeep_chunks", 3).unwrap();
        store.upsert(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/lorekeep_chunks/points/delete"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = VectorStore::new(&server.uri(), "lorekeep_chunks", 3).unwrap();
        store
            .delete_by_item(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_rejects_wrong_dimension_before_request() {
        let store = VectorStore::new("http://127.0.0.1:1", "lorekeep_chunks", 768).unwrap();
        let err = store
            .search(
                &[0.1, 0.2],
                Uuid::new_v4(),
                Uuid::new_v4(),
                RetrievalScope::All,
                10,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::EmbeddingDimMismatch {
                expected: 768,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_search_parses_hits_from_payload() {
        let server = MockServer::start().await;
        let item_id = Uuid::new_v4();
        let p = payload(item_id, 2);
        Mock::given(method("POST"))
            .and(path("/collections/lorekeep_chunks/points/search"))
            .and(body_partial_json(json!({ "with_payload": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [ { "id": Uuid::new_v4(), "score": 0.87, "payload": p.clone() } ]
            })))
            .mount(&server)
            .await;

        let store = VectorStore::new(&server.uri(), "lorekeep_chunks", 3).unwrap();
        let hits = store
            .search(
                &[0.1, 0.2, 0.3],
                p.company_id,
                p.owner_user_id,
                RetrievalScope::Personal,
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, item_id);
        assert_eq!(hits[0].chunk_index, 2);
        assert!((hits[0].score - 0.87).abs() < f32::EPSILON);
        assert_eq!(hits[0].text, "chunk text");
    }
}
