//! HTTP handlers for booking-service.

pub mod amenities;
pub mod bookings;
pub mod listings;
pub mod payments;
pub mod reviews;

use crate::services::get_metrics;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "booking-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness probe; fails while the store or the notification queue is
/// unreachable.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.ping().await;
    if let Err(e) = &store {
        tracing::warn!(error = %e, "Readiness check failed: store");
    }
    let queue = state.queue.health_check().await;
    if let Err(e) = &queue {
        tracing::warn!(error = %e, "Readiness check failed: notification queue");
    }

    if store.is_ok() && queue.is_ok() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "store": if store.is_ok() { "ok" } else { "error" },
                "queue": if queue.is_ok() { "ok" } else { "error" }
            })),
        )
    }
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
