//! Background worker: claims index jobs and runs them through the pipeline.
//!
//! Two delivery paths feed one worker. The poll loop claims up to a batch of
//! pending jobs on a fixed interval and runs them sequentially in creation
//! order. The optional queue loop blocking-pops job ids from the distributed
//! list and claims each conditionally, so an id that a polling worker already
//! took is dropped on the floor. Both paths funnel into the same execute
//! call, and one job's failure never stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lorekeep_core::{defaults, Error, IndexJob, IndexJobType, Result};
use lorekeep_db::Database;

use crate::pipeline::IndexPipeline;
use crate::queue::JobQueue;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the index worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Jobs claimed per poll cycle.
    pub poll_batch: i64,
    /// Blocking-pop timeout for the distributed queue, in seconds.
    pub queue_pop_timeout_secs: u64,
    /// Whether to process jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            poll_batch: defaults::JOB_POLL_BATCH,
            queue_pop_timeout_secs: defaults::QUEUE_POP_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `JOB_POLL_BATCH` | `4` | Jobs claimed per poll cycle |
    /// | `JOB_QUEUE_POP_TIMEOUT_SECS` | `5` | Blocking-pop timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);
        let poll_batch = std::env::var("JOB_POLL_BATCH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::JOB_POLL_BATCH)
            .max(1);
        let queue_pop_timeout_secs = std::env::var("JOB_QUEUE_POP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::QUEUE_POP_TIMEOUT_SECS);

        Self {
            poll_interval_ms,
            poll_batch,
            queue_pop_timeout_secs,
            enabled,
        }
    }
}

/// Event emitted by the index worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted {
        job_id: Uuid,
        job_type: IndexJobType,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        job_type: IndexJobType,
    },
    /// A job failed.
    JobFailed {
        job_id: Uuid,
        job_type: IndexJobType,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal all worker loops to shut down gracefully.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(true)
            .map_err(|_| Error::Internal("worker already stopped".to_string()))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Index worker processing jobs from both delivery paths.
pub struct IndexWorker {
    db: Arc<Database>,
    pipeline: Arc<IndexPipeline>,
    queue: Option<JobQueue>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl IndexWorker {
    pub fn new(
        db: Arc<Database>,
        pipeline: Arc<IndexPipeline>,
        queue: Option<JobQueue>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            db,
            pipeline,
            queue,
            config,
            event_tx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Number of jobs still waiting to be claimed.
    pub async fn pending_count(&self) -> Result<i64> {
        self.db.jobs.pending_count().await
    }

    /// Start the worker loops and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);

        if !worker.config.enabled {
            info!("Index worker is disabled, not starting");
            return WorkerHandle {
                shutdown_tx,
                event_rx,
            };
        }

        let _ = worker.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_worker = worker.clone();
        let mut poll_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            poll_worker.run_poll_loop(&mut poll_shutdown).await;
            let _ = poll_worker.event_tx.send(WorkerEvent::WorkerStopped);
        });

        if worker.queue.is_some() {
            let queue_worker = worker.clone();
            let mut queue_shutdown = shutdown_rx;
            tokio::spawn(async move {
                queue_worker.run_queue_loop(&mut queue_shutdown).await;
            });
        }

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Poll loop: claim a batch, run it sequentially, sleep only when idle.
    async fn run_poll_loop(&self, shutdown: &mut watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            poll_batch = self.config.poll_batch,
            "Index worker poll loop started"
        );
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let jobs = match self.db.jobs.claim_batch(self.config.poll_batch).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "Failed to claim job batch");
                    Vec::new()
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sleep(poll_interval) => {}
                }
                continue;
            }

            debug!(claimed = jobs.len(), "Processing job batch");
            for job in jobs {
                self.execute_job(&job).await;
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        info!("Index worker poll loop stopped");
    }

    /// Queue loop: blocking-pop ids, claim conditionally, run one at a time.
    async fn run_queue_loop(&self, shutdown: &mut watch::Receiver<bool>) {
        let Some(queue) = &self.queue else {
            return;
        };
        info!(
            pop_timeout_secs = self.config.queue_pop_timeout_secs,
            "Index worker queue loop started"
        );
        let timeout = Duration::from_secs(self.config.queue_pop_timeout_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let popped = match queue.pop(timeout).await {
                Ok(popped) => popped,
                Err(e) => {
                    warn!(error = %e, "Queue pop failed, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(timeout) => {}
                    }
                    continue;
                }
            };

            let Some(job_id) = popped else { continue };

            match self.db.jobs.claim_by_id(job_id).await {
                Ok(Some(job)) => self.execute_job(&job).await,
                Ok(None) => {
                    // A polling worker won the race; nothing to do.
                    debug!(job_id = %job_id, "Popped job already claimed");
                }
                Err(e) => error!(job_id = %job_id, error = %e, "Failed to claim popped job"),
            }
        }

        info!("Index worker queue loop stopped");
    }

    async fn execute_job(&self, job: &IndexJob) {
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id: job.id,
            job_type: job.job_type,
        });

        match self.pipeline.execute(job).await {
            Ok(()) => {
                let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                    job_id: job.id,
                    job_type: job.job_type,
                });
            }
            Err(e) => {
                error!(
                    subsystem = "index",
                    component = "worker",
                    job_id = %job.id,
                    item_id = %job.item_id,
                    job_type = job.job_type.as_str(),
                    error = %e,
                    "Job failed"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id: job.id,
                    job_type: job.job_type,
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
        assert_eq!(config.poll_batch, defaults::JOB_POLL_BATCH);
        assert!(config.enabled);
    }
}
