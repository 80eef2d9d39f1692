//! Chapa payment provider client.
//!
//! Uses Chapa's hosted checkout: `transaction/initialize` returns a checkout
//! URL, `transaction/verify/{tx_ref}` reports the final state. Webhooks are
//! signed with HMAC-SHA256 over the raw body.

use crate::config::ChapaConfig;
use crate::services::gateway::{
    CheckoutRequest, GatewayError, GatewayResult, PaymentGateway, VerificationOutcome,
};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct ChapaClient {
    client: Client,
    config: ChapaConfig,
}

#[derive(Debug, Serialize)]
struct Customization<'a> {
    title: &'a str,
    description: &'a str,
}

/// Body of `POST /transaction/initialize`.
#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    amount: Decimal,
    currency: &'a str,
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    tx_ref: &'a str,
    callback_url: &'a str,
    return_url: &'a str,
    customization: Customization<'a>,
}

/// Envelope shared by every Chapa response.
#[derive(Debug, Deserialize)]
struct ChapaResponse<T> {
    status: String,
    #[serde(default)]
    message: serde_json::Value,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CheckoutData {
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
}

/// Flatten Chapa's `message`, which is either a string or a map of field errors.
fn message_text(message: &serde_json::Value) -> String {
    match message {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "no message".to_string(),
        other => other.to_string(),
    }
}

impl ChapaClient {
    pub fn new(config: ChapaConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    /// Read a response body, turning 5xx and unparseable bodies into errors.
    async fn read_envelope<T>(
        response: reqwest::Response,
    ) -> Result<ChapaResponse<T>, GatewayError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, body = %body, "Chapa response");

        if status.is_server_error() {
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{} (status {})", e, status)))
    }
}

#[async_trait]
impl PaymentGateway for ChapaClient {
    async fn initiate(&self, request: &CheckoutRequest) -> Result<GatewayResult, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let body = InitializeRequest {
            amount: request.amount,
            currency: &request.currency,
            email: &request.payer_email,
            first_name: &request.payer_first_name,
            last_name: &request.payer_last_name,
            tx_ref: &request.transaction_ref,
            callback_url: &request.callback_url,
            return_url: &request.return_url,
            customization: Customization {
                title: &request.title,
                description: &request.description,
            },
        };

        let response = self
            .client
            .post(self.url("transaction/initialize"))
            .bearer_auth(self.config.secret_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let envelope: ChapaResponse<CheckoutData> = Self::read_envelope(response).await?;

        match (envelope.status.as_str(), envelope.data) {
            ("success", Some(data)) => {
                tracing::info!(tx_ref = %request.transaction_ref, "Chapa checkout created");
                Ok(GatewayResult::Success {
                    checkout_url: data.checkout_url,
                })
            }
            ("success", None) => Err(GatewayError::InvalidResponse(
                "success without checkout_url".to_string(),
            )),
            _ => {
                let reason = message_text(&envelope.message);
                tracing::warn!(
                    tx_ref = %request.transaction_ref,
                    reason = %reason,
                    "Chapa rejected checkout"
                );
                Ok(GatewayResult::Failure { reason })
            }
        }
    }

    async fn verify(&self, transaction_ref: &str) -> Result<VerificationOutcome, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let response = self
            .client
            .get(self.url(&format!("transaction/verify/{}", transaction_ref)))
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await?;

        let envelope: ChapaResponse<VerifyData> = Self::read_envelope(response).await?;

        if envelope.status != "success" {
            return Ok(VerificationOutcome::Failure {
                reason: message_text(&envelope.message),
            });
        }

        let data = envelope.data.ok_or_else(|| {
            GatewayError::InvalidResponse("verification without data".to_string())
        })?;

        let outcome = match data.status.to_ascii_lowercase().as_str() {
            "success" => VerificationOutcome::Success,
            "pending" => VerificationOutcome::Pending,
            other => VerificationOutcome::Failure {
                reason: format!("transaction {}", other),
            },
        };

        tracing::info!(tx_ref = %transaction_ref, outcome = ?outcome, "Chapa verification");
        Ok(outcome)
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        let secret = self.config.webhook_secret.expose_secret();
        if secret.is_empty() {
            return false;
        }
        match service_core::utils::verify_payload(secret, body, signature) {
            Ok(valid) => {
                if !valid {
                    tracing::warn!("Chapa webhook signature verification failed");
                }
                valid
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not compute webhook signature");
                false
            }
        }
    }

    fn requires_webhook_signature(&self) -> bool {
        !self.config.webhook_secret.expose_secret().is_empty()
    }
}
