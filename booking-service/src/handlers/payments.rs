//! Gateway-facing payment routes: the payer's return callback and the
//! server-to-server webhook. Neither carries a user identity.

use axum::{
    body::Bytes,
    extract::{Json, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use service_core::error::AppError;

use crate::dtos::{VerifyQuery, WebhookPayload};
use crate::workflow::{VerificationReport, WorkflowError};
use crate::AppState;

const SIGNATURE_HEADERS: [&str; 2] = ["chapa-signature", "x-chapa-signature"];

/// GET /payments/verify?tx_ref=..&sig=..
#[tracing::instrument(skip_all, fields(tx_ref = ?query.reference()))]
pub async fn verify_payment(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerificationReport>, AppError> {
    let reference = query
        .reference()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("tx_ref is required")))?;

    if state.callback_signature_required {
        let valid = query
            .sig
            .as_deref()
            .map(|sig| {
                state
                    .workflow
                    .settings()
                    .verify_callback_signature(reference, sig)
            })
            .unwrap_or(false);
        if !valid {
            tracing::warn!(
                tx_ref = %reference,
                "Rejected callback with missing or invalid signature"
            );
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid callback signature"
            )));
        }
    }

    match state.workflow.verify_payment(reference).await {
        Ok(report) => Ok(Json(report)),
        Err(WorkflowError::NotFound(what)) => Err(AppError::BadRequest(anyhow::anyhow!(
            "Unknown transaction reference: {} not found",
            what
        ))),
        Err(e) => Err(e.into()),
    }
}

/// POST /webhooks/chapa
#[tracing::instrument(skip_all)]
pub async fn chapa_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if state.gateway.requires_webhook_signature() {
        let signature = SIGNATURE_HEADERS
            .iter()
            .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()));
        let valid = signature
            .map(|sig| state.gateway.verify_webhook_signature(&body, sig))
            .unwrap_or(false);
        if !valid {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid webhook signature"
            )));
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {}", e)))?;

    tracing::info!(
        tx_ref = %payload.tx_ref,
        status = ?payload.status,
        "Chapa webhook received"
    );

    match state.workflow.verify_payment(&payload.tx_ref).await {
        Ok(report) => Ok((StatusCode::OK, Json(report)).into_response()),
        Err(WorkflowError::NotFound(_)) => {
            tracing::warn!(tx_ref = %payload.tx_ref, "Webhook for unknown transaction reference");
            Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response())
        }
        Err(e) => Err(e.into()),
    }
}
