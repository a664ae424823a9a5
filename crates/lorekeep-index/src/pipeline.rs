//! The indexing pipeline: from a claimed job to chunks and vectors.
//!
//! Failure handling contract: `execute` records a failure on both the job row
//! and the item row before returning the error, so either side can be
//! inspected; the worker loop logs it and moves on. Embeddings are produced
//! and dimension-checked before the chunk table is touched, so an embedding
//! failure leaves the prior chunks and vectors in place for serving until a
//! retry succeeds. There is no transaction spanning the chunk replace and the
//! vector upsert; a crash between them leaves the two stores briefly
//! inconsistent until the next successful reindex, which the delete-then-upsert
//! vector write makes convergent.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use lorekeep_core::{
    chunker, defaults, ChunkOverrides, ChunkStrategy, EmbeddingProvider, Error, IndexJob,
    IndexJobType, IndexStatus, ItemStatus, Result,
};
use lorekeep_db::{Database, EnqueueJobParams, NewChunk};
use lorekeep_vector::{VectorPoint, VectorStore};

use crate::extract::SourceExtractor;
use crate::queue::JobQueue;

/// Chunking parameters resolved from per-job overrides and defaults.
fn resolve_chunking(overrides: Option<&ChunkOverrides>) -> (ChunkStrategy, usize, Option<String>) {
    let strategy = overrides
        .and_then(|o| o.strategy.as_deref())
        .map(ChunkStrategy::parse)
        .unwrap_or_default();
    let size = overrides
        .and_then(|o| o.size)
        .map(|s| s.max(1) as usize)
        .unwrap_or(defaults::CHUNK_SIZE);
    let separator = overrides.and_then(|o| o.separator.clone());
    (strategy, size, separator)
}

/// Embed chunk texts and check every vector against the store dimension.
///
/// Runs before any chunk rows are replaced, so a provider outage or a
/// misconfigured model fails the job without destroying the data currently
/// being served.
async fn embed_and_verify(
    embedder: &dyn EmbeddingProvider,
    texts: &[String],
    expected: usize,
) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed(texts).await?;
    for vector in &vectors {
        if vector.len() != expected {
            return Err(Error::EmbeddingDimMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(vectors)
}

/// Orchestrates enqueueing and running index jobs.
pub struct IndexPipeline {
    db: Arc<Database>,
    vector: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: SourceExtractor,
    queue: Option<JobQueue>,
}

impl IndexPipeline {
    pub fn new(
        db: Arc<Database>,
        vector: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: SourceExtractor,
        queue: Option<JobQueue>,
    ) -> Self {
        Self {
            db,
            vector,
            embedder,
            extractor,
            queue,
        }
    }

    /// Enqueue a job: durable row first, fast-path push second. A redis
    /// failure downgrades to poll-only delivery instead of failing the call.
    pub async fn enqueue(&self, params: EnqueueJobParams) -> Result<IndexJob> {
        let job = self.db.jobs.enqueue(params).await?;
        self.push_fast_path(job.id).await;
        info!(
            subsystem = "index",
            component = "pipeline",
            op = "enqueue",
            job_id = %job.id,
            item_id = %job.item_id,
            job_type = job.job_type.as_str(),
            "Job enqueued"
        );
        Ok(job)
    }

    /// Reset a finished job to pending and re-announce it.
    pub async fn retry(&self, job_id: Uuid) -> Result<IndexJob> {
        let job = self.db.jobs.retry(job_id).await?;
        self.push_fast_path(job.id).await;
        info!(
            subsystem = "index",
            component = "pipeline",
            op = "retry",
            job_id = %job.id,
            "Job reset to pending"
        );
        Ok(job)
    }

    async fn push_fast_path(&self, job_id: Uuid) {
        if let Some(queue) = &self.queue {
            if let Err(e) = queue.push(job_id).await {
                warn!(
                    subsystem = "index",
                    component = "pipeline",
                    job_id = %job_id,
                    error = %e,
                    "Fast-path push failed, job will be picked up by polling"
                );
            }
        }
    }

    /// Run one claimed job to completion, recording the outcome on the job
    /// and, on failure, on the item as well.
    pub async fn execute(&self, job: &IndexJob) -> Result<()> {
        let start = Instant::now();
        match self.run(job).await {
            Ok(()) => {
                self.db.jobs.mark_success(job.id).await?;
                info!(
                    subsystem = "index",
                    component = "pipeline",
                    op = "run_job",
                    job_id = %job.id,
                    item_id = %job.item_id,
                    job_type = job.job_type.as_str(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    success = true,
                    "Job complete"
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(record_err) = self.db.jobs.mark_failed(job.id, &message).await {
                    error!(
                        subsystem = "index",
                        job_id = %job.id,
                        error = %record_err,
                        "Failed to record job failure"
                    );
                }
                if let Err(record_err) = self
                    .db
                    .items
                    .set_index_status(job.item_id, IndexStatus::Failed, Some(&message))
                    .await
                {
                    error!(
                        subsystem = "index",
                        item_id = %job.item_id,
                        error = %record_err,
                        "Failed to record item index failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run(&self, job: &IndexJob) -> Result<()> {
        match job.job_type {
            IndexJobType::Delete => self.run_delete(job).await,
            IndexJobType::Upsert | IndexJobType::Reindex => self.run_upsert(job).await,
        }
    }

    /// Remove chunks and vectors. The item row may already be gone, in which
    /// case only the derived data is cleaned up.
    async fn run_delete(&self, job: &IndexJob) -> Result<()> {
        self.cleanup(job.company_id, job.item_id).await?;
        match self
            .db
            .items
            .set_index_status(job.item_id, IndexStatus::Skipped, None)
            .await
        {
            Ok(()) => Ok(()),
            Err(Error::ItemNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn run_upsert(&self, job: &IndexJob) -> Result<()> {
        let item = self.db.items.get_required(job.item_id).await?;

        if item.status != ItemStatus::Active || !item.is_indexable {
            // Deleted or opted-out since the job was enqueued: converge to
            // the delete path.
            self.cleanup(job.company_id, job.item_id).await?;
            return self
                .db
                .items
                .set_index_status(job.item_id, IndexStatus::Skipped, None)
                .await;
        }

        self.db
            .items
            .set_index_status(item.id, IndexStatus::Running, None)
            .await?;

        let files = self.db.items.active_files(item.id).await?;
        let sources = self.extractor.extract(&item, &files).await?;
        if sources.is_empty() {
            self.cleanup(job.company_id, job.item_id).await?;
            return self
                .db
                .items
                .set_index_status(item.id, IndexStatus::Skipped, None)
                .await;
        }

        let (strategy, size, separator) = resolve_chunking(job.overrides.as_ref());
        let mut new_chunks: Vec<NewChunk> = Vec::new();
        for source in &sources {
            let splits = chunker::split_with_strategy(
                &source.text,
                strategy,
                size,
                defaults::CHUNK_OVERLAP,
                separator.as_deref(),
            );
            for split in splits {
                new_chunks.push(NewChunk {
                    chunk_index: new_chunks.len() as i32,
                    chunk_text: split.text,
                    token_count: split.token_count,
                    content_hash: split.content_hash,
                    source_type: source.source_type,
                    source_locator: source.source_locator.clone(),
                });
            }
        }

        let texts: Vec<String> = new_chunks.iter().map(|c| c.chunk_text.clone()).collect();
        let vectors =
            embed_and_verify(self.embedder.as_ref(), &texts, self.vector.dimension()).await?;

        let chunk_ids = self.db.chunks.replace_for_item(item.id, &new_chunks).await?;

        let points: Vec<VectorPoint> = chunk_ids
            .iter()
            .zip(vectors)
            .zip(&new_chunks)
            .map(|((id, vector), chunk)| VectorPoint {
                id: *id,
                vector,
                payload: lorekeep_vector::VectorPayload {
                    company_id: item.company_id,
                    owner_user_id: item.owner_user_id,
                    source_scope: item.source_scope,
                    item_id: item.id,
                    chunk_index: chunk.chunk_index,
                    content_hash: chunk.content_hash.clone(),
                    source_type: chunk.source_type,
                    source_locator: chunk.source_locator.clone(),
                    text: chunk.chunk_text.clone(),
                },
            })
            .collect();

        // Delete-then-upsert keeps the store convergent even when an older
        // chunking of the item left behind more points than we now write.
        self.vector.ensure_collection_cached().await?;
        self.vector.delete_by_item(item.company_id, item.id).await?;
        self.vector.upsert(&points).await?;

        self.db
            .items
            .set_index_status(item.id, IndexStatus::Success, None)
            .await?;

        info!(
            subsystem = "index",
            component = "pipeline",
            item_id = %item.id,
            chunk_count = new_chunks.len(),
            "Item indexed"
        );
        Ok(())
    }

    async fn cleanup(&self, company_id: Uuid, item_id: Uuid) -> Result<()> {
        self.db.chunks.delete_for_item(item_id).await?;
        self.vector.delete_by_item(company_id, item_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    struct FixedDimEmbedder {
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedDimEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1; self.dim]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_and_verify_rejects_wrong_dimension() {
        let embedder = FixedDimEmbedder { dim: 3 };
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let err = embed_and_verify(&embedder, &texts, 8).await.unwrap_err();
        assert!(matches!(
            err,
            Error::EmbeddingDimMismatch {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_embed_and_verify_passes_matching_vectors_through() {
        let embedder = FixedDimEmbedder { dim: 8 };
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = embed_and_verify(&embedder, &texts, 8).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 8));
    }

    #[test]
    fn test_resolve_chunking_defaults() {
        let (strategy, size, separator) = resolve_chunking(None);
        assert_eq!(strategy, ChunkStrategy::Heuristic);
        assert_eq!(size, defaults::CHUNK_SIZE);
        assert!(separator.is_none());
    }

    #[test]
    fn test_resolve_chunking_overrides() {
        let overrides = ChunkOverrides {
            strategy: Some("separator".to_string()),
            size: Some(500),
            separator: Some("===".to_string()),
        };
        let (strategy, size, separator) = resolve_chunking(Some(&overrides));
        assert_eq!(strategy, ChunkStrategy::Separator);
        assert_eq!(size, 500);
        assert_eq!(separator.as_deref(), Some("==="));
    }

    #[test]
    fn test_resolve_chunking_unknown_strategy_falls_back() {
        let overrides = ChunkOverrides {
            strategy: Some("mystery".to_string()),
            size: None,
            separator: None,
        };
        let (strategy, _, _) = resolve_chunking(Some(&overrides));
        assert_eq!(strategy, ChunkStrategy::Heuristic);
    }
}
