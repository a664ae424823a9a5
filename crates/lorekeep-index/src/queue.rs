//! Distributed fast-path job queue over a redis list.
//!
//! Only job ids travel through the list; the `index_job` table stays the
//! source of truth. A popped id is claimed with a conditional update, so a
//! polling worker winning the race first makes the pop a harmless no-op.
//! The queue is strictly an optimization: when redis is down, enqueue still
//! succeeds and polling picks the job up within one interval.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use lorekeep_core::{defaults, Error, Result};

/// Redis-backed queue carrying pending job ids.
#[derive(Clone)]
pub struct JobQueue {
    manager: ConnectionManager,
    key: String,
}

impl JobQueue {
    /// Connect to redis and wrap the given list key.
    pub async fn connect(url: &str, key: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| Error::Job(format!("redis open: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Job(format!("redis connect: {e}")))?;
        Ok(Self {
            manager,
            key: key.to_string(),
        })
    }

    /// Connect using `REDIS_URL`; `None` when the variable is unset.
    pub async fn from_env() -> Result<Option<Self>> {
        match std::env::var("REDIS_URL") {
            Ok(url) if !url.is_empty() => {
                let key = std::env::var("JOB_QUEUE_KEY")
                    .unwrap_or_else(|_| defaults::QUEUE_KEY.to_string());
                Ok(Some(Self::connect(&url, &key).await?))
            }
            _ => Ok(None),
        }
    }

    /// Push a job id onto the queue.
    pub async fn push(&self, job_id: Uuid) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .lpush(&self.key, job_id.to_string())
            .await
            .map_err(|e| Error::Job(format!("redis lpush: {e}")))?;
        debug!(
            subsystem = "index",
            component = "queue",
            job_id = %job_id,
            "Pushed job to fast path"
        );
        Ok(())
    }

    /// Blocking-pop one job id, returning `None` on timeout. Ids that do not
    /// parse are dropped with a warning rather than wedging the consumer.
    pub async fn pop(&self, timeout: Duration) -> Result<Option<Uuid>> {
        let mut conn = self.manager.clone();
        let popped: Option<(String, String)> = conn
            .brpop(&self.key, timeout.as_secs_f64())
            .await
            .map_err(|e| Error::Job(format!("redis brpop: {e}")))?;

        match popped {
            Some((_, raw)) => match raw.parse::<Uuid>() {
                Ok(id) => Ok(Some(id)),
                Err(_) => {
                    warn!(
                        subsystem = "index",
                        component = "queue",
                        payload = %raw,
                        "Discarding malformed queue entry"
                    );
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}
