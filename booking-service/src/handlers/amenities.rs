use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{AmenityResponse, CreateAmenityRequest};
use crate::middleware::StaffUser;
use crate::models::Amenity;
use crate::AppState;

/// GET /amenities
pub async fn list_amenities(
    State(state): State<AppState>,
) -> Result<Json<Vec<AmenityResponse>>, AppError> {
    let amenities = state.store.list_amenities().await?;
    Ok(Json(amenities.into_iter().map(AmenityResponse::from).collect()))
}

/// GET /amenities/:id
pub async fn get_amenity(
    State(state): State<AppState>,
    Path(amenity_id): Path<Uuid>,
) -> Result<Json<AmenityResponse>, AppError> {
    let amenity = state.store.get_amenity(amenity_id).await?;
    Ok(Json(AmenityResponse::from(amenity)))
}

/// POST /amenities
#[tracing::instrument(skip_all, fields(name = %req.name))]
pub async fn create_amenity(
    State(state): State<AppState>,
    StaffUser(_staff): StaffUser,
    Json(req): Json<CreateAmenityRequest>,
) -> Result<(StatusCode, Json<AmenityResponse>), AppError> {
    req.validate()?;

    let amenity = state
        .store
        .create_amenity(Amenity {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            icon: req.icon,
        })
        .await?;

    tracing::info!(amenity_id = %amenity.id, "Amenity created");
    Ok((StatusCode::CREATED, Json(AmenityResponse::from(amenity))))
}
