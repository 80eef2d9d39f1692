//! Background email notifications.
//!
//! The request path only calls [`NotificationQueue::enqueue`]. A
//! [`worker::NotificationWorker`] claims jobs from a [`JobSource`], renders
//! them and hands them to an [`email::EmailProvider`].

pub mod channel;
pub mod email;
pub mod redis_queue;
pub mod templates;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use channel::{channel_queue, ChannelJobSource, ChannelNotificationQueue};
pub use email::{EmailMessage, EmailProvider, MockEmailProvider, ProviderError, SmtpProvider};
pub use redis_queue::{RedisJobSource, RedisNotificationQueue};
pub use worker::NotificationWorker;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    BookingCreated,
    PaymentConfirmed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingCreated => "booking-created",
            NotificationKind::PaymentConfirmed => "payment-confirmed",
        }
    }
}

/// A unit of work for the notification worker, serialized as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationJob {
    pub job_id: Uuid,
    pub kind: NotificationKind,
    /// Booking id for `booking-created`, payment id for `payment-confirmed`.
    pub entity_id: Uuid,
    pub recipient_email: String,
    pub template_fields: BTreeMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
}

impl NotificationJob {
    pub fn new(
        kind: NotificationKind,
        entity_id: Uuid,
        recipient_email: impl Into<String>,
        template_fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind,
            entity_id,
            recipient_email: recipient_email.into(),
            template_fields,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: Uuid,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("notification queue is full")]
    Full,

    #[error("notification queue is closed")]
    Closed,

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid job payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Producer side of the queue.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn enqueue(&self, job: NotificationJob) -> Result<JobHandle, QueueError>;

    /// Whether the backing store is reachable. Used by the readiness probe.
    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

pub type SharedQueue = Arc<dyn NotificationQueue>;

/// A job taken off the queue but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: NotificationJob,
    /// Payload exactly as stored, needed to remove it from the processing list.
    pub raw: String,
}

/// Consumer side of the queue.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Wait for the next job. `Ok(None)` means the poll window elapsed.
    async fn next(&self) -> Result<Option<ClaimedJob>, QueueError>;

    async fn ack(&self, job: &ClaimedJob) -> Result<(), QueueError>;

    /// Park a job that can't be delivered and acknowledge it.
    async fn dead_letter(&self, job: &ClaimedJob) -> Result<(), QueueError>;

    /// Return jobs claimed by a worker that never acknowledged them to the
    /// queue. Called once before the worker starts; returns how many moved.
    async fn recover(&self) -> Result<usize, QueueError> {
        Ok(0)
    }
}
