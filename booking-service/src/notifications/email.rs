use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

impl ProviderError {
    /// Whether trying again could help.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::SendFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<(), ProviderError>;
    fn is_enabled(&self) -> bool;
}

pub struct SmtpProvider {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpProvider {
    pub fn new(config: SmtpConfig) -> Result<Self, ProviderError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { config, transport })
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailMessage) -> Result<(), ProviderError> {
        let from_mailbox: Mailbox =
            format!("{} <{}>", self.config.from_name, self.config.from_email)
                .parse()
                .map_err(|e| {
                    ProviderError::Configuration(format!("Invalid from address: {}", e))
                })?;

        let to_mailbox: Mailbox = email
            .to
            .parse()
            .map_err(|e| ProviderError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body_text.clone())
            .map_err(|e| ProviderError::Configuration(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ProviderError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent successfully");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Provider used when SMTP is disabled and in tests.
///
/// Records what it was asked to send. Queued failures are returned first.
#[derive(Default)]
pub struct MockEmailProvider {
    send_count: AtomicU64,
    sent: Mutex<Vec<EmailMessage>>,
    failures: Mutex<VecDeque<ProviderError>>,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: ProviderError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, email: &EmailMessage) -> Result<(), ProviderError> {
        if let Some(error) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(error);
        }

        self.send_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "[MOCK] Email would be sent"
        );
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
