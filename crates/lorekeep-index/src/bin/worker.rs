//! Standalone index worker process.
//!
//! Wires the database, vector store, providers, and optional fast-path queue
//! into one worker and runs until interrupted.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lorekeep_core::{EmbeddingProvider, Error, Result};
use lorekeep_db::Database;
use lorekeep_index::extract::{FsMediaStore, SourceExtractor};
use lorekeep_index::pipeline::IndexPipeline;
use lorekeep_index::queue::JobQueue;
use lorekeep_index::worker::{IndexWorker, WorkerConfig};
use lorekeep_inference::{AiSettings, HttpEmbeddingProvider, HttpOcrProvider, HttpVisionProvider};
use lorekeep_vector::VectorStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| Error::Config("DATABASE_URL is required".to_string()))?;
    let db = Arc::new(Database::connect(&database_url).await?);

    let settings = AiSettings::from_env()?;
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(HttpEmbeddingProvider::new(settings.embed.clone())?);

    let vector = Arc::new(VectorStore::from_env()?);
    vector.ensure_collection_cached().await?;

    let mut extractor = SourceExtractor::new(Arc::new(FsMediaStore::from_env()));
    if let Some(url) = &settings.ocr_base_url {
        extractor = extractor.with_ocr(Arc::new(HttpOcrProvider::new(url)?));
    }
    if let Some(url) = &settings.vision_base_url {
        extractor = extractor.with_vision(Arc::new(HttpVisionProvider::new(url)?));
    }

    let queue = match JobQueue::from_env().await {
        Ok(queue) => queue,
        Err(e) => {
            warn!(error = %e, "Fast-path queue unavailable, running poll-only");
            None
        }
    };

    let pipeline = Arc::new(IndexPipeline::new(
        db.clone(),
        vector,
        embedder,
        extractor,
        queue.clone(),
    ));

    let worker = IndexWorker::new(db, pipeline, queue, WorkerConfig::from_env());
    let handle = worker.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown()?;
    Ok(())
}
