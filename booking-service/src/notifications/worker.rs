use super::email::EmailProvider;
use super::templates;
use super::{ClaimedJob, JobSource, QueueError};
use crate::services::metrics;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct NotificationWorker {
    source: Arc<dyn JobSource>,
    provider: Arc<dyn EmailProvider>,
    max_retry: Duration,
    shutdown: CancellationToken,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    DeadLettered,
}

impl NotificationWorker {
    pub fn new(
        source: Arc<dyn JobSource>,
        provider: Arc<dyn EmailProvider>,
        max_retry: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            provider,
            max_retry,
            shutdown,
        }
    }

    /// Consume jobs until cancelled or the queue closes.
    pub async fn run(self) {
        tracing::info!("Notification worker started");

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Notification worker shutting down");
                    break;
                }
                next = self.source.next() => next,
            };

            match next {
                Ok(Some(claimed)) => {
                    if let Err(e) = self.handle(&claimed).await {
                        tracing::error!(
                            job_id = %claimed.job.job_id,
                            error = %e,
                            "Failed to settle notification job on the queue"
                        );
                    }
                }
                Ok(None) => continue,
                Err(QueueError::Closed) => {
                    tracing::info!("Notification queue closed, worker exiting");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read notification queue");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
    }

    /// Deliver one job and acknowledge or dead-letter it.
    pub async fn handle(&self, claimed: &ClaimedJob) -> Result<Delivery, QueueError> {
        let job = &claimed.job;
        let kind = job.kind.as_str();

        let email = match templates::render(job) {
            Ok(email) => email,
            Err(e) => {
                tracing::error!(
                    job_id = %job.job_id,
                    kind,
                    error = %e,
                    "Cannot render notification"
                );
                metrics::record_notification_failed(kind);
                self.source.dead_letter(claimed).await?;
                return Ok(Delivery::DeadLettered);
            }
        };

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(self.max_retry),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.provider.send(&email).await.map_err(|e| {
                if e.is_transient() {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Email send failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await;

        match result {
            Ok(()) => {
                metrics::record_notification_delivered(kind);
                tracing::info!(
                    job_id = %job.job_id,
                    kind,
                    entity_id = %job.entity_id,
                    "Notification delivered"
                );
                self.source.ack(claimed).await?;
                Ok(Delivery::Delivered)
            }
            Err(e) => {
                metrics::record_notification_failed(kind);
                tracing::error!(
                    job_id = %job.job_id,
                    kind,
                    entity_id = %job.entity_id,
                    error = %e,
                    "Notification abandoned"
                );
                self.source.dead_letter(claimed).await?;
                Ok(Delivery::DeadLettered)
            }
        }
    }
}
