//! Payment gateway boundary.
//!
//! The workflow only sees typed outcomes. A [`GatewayError`] means the gateway
//! could not be asked or gave an unusable answer; a definite "no" from the
//! gateway is a `Failure` outcome, not an error.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Everything the gateway needs to open a hosted checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub amount: Decimal,
    pub currency: String,
    pub payer_email: String,
    pub payer_first_name: String,
    pub payer_last_name: String,
    pub transaction_ref: String,
    pub callback_url: String,
    pub return_url: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResult {
    Success { checkout_url: String },
    Failure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success,
    Failure { reason: String },
    /// The gateway has not settled the transaction yet.
    Pending,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway not configured")]
    NotConfigured,

    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: &CheckoutRequest) -> Result<GatewayResult, GatewayError>;

    async fn verify(&self, transaction_ref: &str) -> Result<VerificationOutcome, GatewayError>;

    /// Check a webhook signature. Gateways without signed webhooks accept nothing.
    fn verify_webhook_signature(&self, _body: &[u8], _signature: &str) -> bool {
        false
    }

    /// Whether webhook calls must carry a signature.
    fn requires_webhook_signature(&self) -> bool {
        true
    }
}

pub type SharedGateway = Arc<dyn PaymentGateway>;

/// Scripted behaviour for one [`MockGateway`] call.
#[derive(Debug, Clone)]
pub enum MockReply<T> {
    Ok(T),
    Error(String),
}

/// Gateway used when `GATEWAY_PROVIDER=mock` and in tests.
///
/// Replies are taken from a queue; once it is empty the default reply is
/// used. Defaults are a checkout URL under `https://checkout.mock` and a
/// successful verification.
#[derive(Default)]
pub struct MockGateway {
    initiate_replies: Mutex<VecDeque<MockReply<GatewayResult>>>,
    verify_replies: Mutex<VecDeque<MockReply<VerificationOutcome>>>,
    requests: Mutex<Vec<CheckoutRequest>>,
    initiate_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_initiate(&self, reply: MockReply<GatewayResult>) {
        if let Ok(mut replies) = self.initiate_replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn push_verify(&self, reply: MockReply<VerificationOutcome>) {
        if let Ok(mut replies) = self.verify_replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CheckoutRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate(&self, request: &CheckoutRequest) -> Result<GatewayResult, GatewayError> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let reply = self
            .initiate_replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front());
        match reply {
            Some(MockReply::Ok(result)) => Ok(result),
            Some(MockReply::Error(msg)) => Err(GatewayError::InvalidResponse(msg)),
            None => Ok(GatewayResult::Success {
                checkout_url: format!("https://checkout.mock/{}", request.transaction_ref),
            }),
        }
    }

    async fn verify(&self, _transaction_ref: &str) -> Result<VerificationOutcome, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .verify_replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front());
        match reply {
            Some(MockReply::Ok(outcome)) => Ok(outcome),
            Some(MockReply::Error(msg)) => Err(GatewayError::InvalidResponse(msg)),
            None => Ok(VerificationOutcome::Success),
        }
    }

    fn requires_webhook_signature(&self) -> bool {
        false
    }
}
