use super::{ClaimedJob, JobHandle, JobSource, NotificationJob, NotificationQueue, QueueError};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

/// In-process queue over a bounded channel. Jobs are lost on restart.
#[derive(Clone)]
pub struct ChannelNotificationQueue {
    tx: mpsc::Sender<NotificationJob>,
}

pub struct ChannelJobSource {
    rx: Mutex<mpsc::Receiver<NotificationJob>>,
}

pub fn channel_queue(size: usize) -> (ChannelNotificationQueue, ChannelJobSource) {
    let (tx, rx) = mpsc::channel(size.max(1));
    (
        ChannelNotificationQueue { tx },
        ChannelJobSource { rx: Mutex::new(rx) },
    )
}

#[async_trait]
impl NotificationQueue for ChannelNotificationQueue {
    async fn enqueue(&self, job: NotificationJob) -> Result<JobHandle, QueueError> {
        let job_id = job.job_id;
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })?;
        Ok(JobHandle { job_id })
    }
}

impl ChannelJobSource {
    /// Take every job currently buffered without waiting.
    pub async fn drain(&self) -> Vec<NotificationJob> {
        let mut rx = self.rx.lock().await;
        let mut jobs = Vec::new();
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

#[async_trait]
impl JobSource for ChannelJobSource {
    async fn next(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(job) => Ok(Some(ClaimedJob {
                job,
                raw: String::new(),
            })),
            None => Err(QueueError::Closed),
        }
    }

    async fn ack(&self, _job: &ClaimedJob) -> Result<(), QueueError> {
        Ok(())
    }

    async fn dead_letter(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        tracing::error!(
            job_id = %job.job.job_id,
            kind = job.job.kind.as_str(),
            "Dropping undeliverable notification"
        );
        Ok(())
    }
}
