//! Durable queue on Redis lists.
//!
//! Producers `LPUSH` onto `notifications:queue`. The worker atomically moves
//! each job to `notifications:processing` with `BLMOVE` and removes it there
//! once handled, so a crash between claim and ack leaves the job recoverable.

use super::{ClaimedJob, JobHandle, JobSource, NotificationJob, NotificationQueue, QueueError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

pub const QUEUE_KEY: &str = "notifications:queue";
pub const PROCESSING_KEY: &str = "notifications:processing";
pub const DEAD_LETTER_KEY: &str = "notifications:dead";

/// Seconds a single `BLMOVE` waits before giving the worker a chance to stop.
const POLL_TIMEOUT_SECS: f64 = 1.0;

async fn connect(client: &Client) -> Result<ConnectionManager, QueueError> {
    client.get_connection_manager().await.map_err(|e| {
        tracing::error!("Failed to get Redis connection manager: {}", e);
        QueueError::Redis(e)
    })
}

#[derive(Clone)]
pub struct RedisNotificationQueue {
    manager: ConnectionManager,
}

impl RedisNotificationQueue {
    pub async fn new(client: &Client) -> Result<Self, QueueError> {
        let manager = connect(client).await?;
        tracing::info!("Notification queue connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl NotificationQueue for RedisNotificationQueue {
    async fn enqueue(&self, job: NotificationJob) -> Result<JobHandle, QueueError> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.manager.clone();
        redis::cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(JobHandle { job_id: job.job_id })
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(QueueError::from)
    }
}

/// Consumer half. Holds its own connection because `BLMOVE` blocks it.
pub struct RedisJobSource {
    manager: ConnectionManager,
}

impl RedisJobSource {
    pub async fn new(client: &Client) -> Result<Self, QueueError> {
        let manager = connect(client).await?;
        Ok(Self { manager })
    }

    /// Put jobs a previous worker claimed but never acked back on the queue.
    pub async fn requeue_stranded(&self) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let mut moved = 0;
        loop {
            let job: Option<String> = redis::cmd("LMOVE")
                .arg(PROCESSING_KEY)
                .arg(QUEUE_KEY)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if job.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            tracing::warn!(count = moved, "Requeued stranded notification jobs");
        }
        Ok(moved)
    }

    async fn remove_from_processing(&self, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        redis::cmd("LREM")
            .arg(PROCESSING_KEY)
            .arg(1)
            .arg(raw)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobSource for RedisJobSource {
    async fn next(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(QUEUE_KEY)
            .arg(PROCESSING_KEY)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(POLL_TIMEOUT_SECS)
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<NotificationJob>(&raw) {
            Ok(job) => Ok(Some(ClaimedJob { job, raw })),
            Err(e) => {
                // Unreadable payloads can never succeed; park them.
                tracing::error!(error = %e, "Malformed notification payload");
                redis::cmd("LPUSH")
                    .arg(DEAD_LETTER_KEY)
                    .arg(&raw)
                    .query_async::<_, ()>(&mut conn)
                    .await?;
                self.remove_from_processing(&raw).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        self.remove_from_processing(&job.raw).await
    }

    async fn dead_letter(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        redis::cmd("LPUSH")
            .arg(DEAD_LETTER_KEY)
            .arg(&job.raw)
            .query_async::<_, ()>(&mut conn)
            .await?;
        self.remove_from_processing(&job.raw).await
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        self.requeue_stranded().await
    }
}
