//! Review handlers.
//!
//! One review per user and listing. Only the author or staff may edit or
//! delete a review.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{CreateReviewRequest, ReviewQuery, ReviewResponse, UpdateReviewRequest};
use crate::middleware::UserContext;
use crate::models::Review;
use crate::services::store::{ReviewFilter, StoreError};
use crate::AppState;

const TOP_RATED_LIMIT: usize = 10;

fn ensure_author_or_staff(review: &Review, user: &UserContext) -> Result<(), AppError> {
    if review.user_id != user.user_id && !user.is_staff() {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Only the author can change this review"
        )));
    }
    Ok(())
}

async fn list(
    state: &AppState,
    filter: ReviewFilter,
) -> Result<Json<Vec<ReviewResponse>>, AppError> {
    let reviews = state.store.list_reviews(&filter).await?;
    Ok(Json(reviews.into_iter().map(ReviewResponse::from).collect()))
}

/// POST /reviews
#[tracing::instrument(skip_all, fields(listing_id = %req.listing_id))]
pub async fn create_review(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<ReviewResponse>), AppError> {
    req.validate()?;

    let listing = state.store.get_listing(req.listing_id).await?;

    if let Some(booking_id) = req.booking_id {
        let booking = match state.store.get_booking(booking_id).await {
            Ok(booking) => booking,
            Err(StoreError::NotFound(_)) => {
                return Err(AppError::BadRequest(anyhow::anyhow!("Booking not found")))
            }
            Err(e) => return Err(e.into()),
        };
        if !booking.is_owned_by(&user.user_id) || booking.listing_id != listing.id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Booking does not belong to you or to this listing"
            )));
        }
    }

    let now = Utc::now();
    let review = state
        .store
        .create_review(Review {
            id: Uuid::new_v4(),
            user_id: user.user_id.clone(),
            listing_id: listing.id,
            booking_id: req.booking_id,
            rating: req.rating,
            comment: req.comment,
            created_at: now,
            updated_at: now,
        })
        .await?;

    tracing::info!(review_id = %review.id, rating = review.rating, "Review created");
    Ok((StatusCode::CREATED, Json(ReviewResponse::from(review))))
}

/// GET /reviews
pub async fn list_reviews(
    State(state): State<AppState>,
    Query(query): Query<ReviewQuery>,
) -> Result<Json<Vec<ReviewResponse>>, AppError> {
    list(
        &state,
        ReviewFilter {
            listing_id: query.listing_id,
            user_id: query.user_id,
            rating: query.rating,
            limit: None,
        },
    )
    .await
}

/// GET /reviews/mine
pub async fn my_reviews(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<ReviewResponse>>, AppError> {
    list(
        &state,
        ReviewFilter {
            user_id: Some(user.user_id),
            ..Default::default()
        },
    )
    .await
}

/// GET /reviews/top-rated
pub async fn top_rated_reviews(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReviewResponse>>, AppError> {
    list(
        &state,
        ReviewFilter {
            rating: Some(5),
            limit: Some(TOP_RATED_LIMIT),
            ..Default::default()
        },
    )
    .await
}

/// GET /reviews/:id
pub async fn get_review(
    State(state): State<AppState>,
    Path(review_id): Path<Uuid>,
) -> Result<Json<ReviewResponse>, AppError> {
    let review = state.store.get_review(review_id).await?;
    Ok(Json(ReviewResponse::from(review)))
}

/// PATCH /reviews/:id
#[tracing::instrument(skip(state, user, req))]
pub async fn update_review(
    State(state): State<AppState>,
    user: UserContext,
    Path(review_id): Path<Uuid>,
    Json(req): Json<UpdateReviewRequest>,
) -> Result<Json<ReviewResponse>, AppError> {
    req.validate()?;

    let mut review = state.store.get_review(review_id).await?;
    ensure_author_or_staff(&review, &user)?;

    if let Some(rating) = req.rating {
        review.rating = rating;
    }
    if let Some(comment) = req.comment {
        review.comment = comment;
    }
    review.updated_at = Utc::now();

    let review = state.store.update_review(review).await?;
    Ok(Json(ReviewResponse::from(review)))
}

/// DELETE /reviews/:id
#[tracing::instrument(skip(state, user))]
pub async fn delete_review(
    State(state): State<AppState>,
    user: UserContext,
    Path(review_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let review = state.store.get_review(review_id).await?;
    ensure_author_or_staff(&review, &user)?;

    state.store.delete_review(review.id).await?;
    tracing::info!(review_id = %review.id, deleted_by = %user.user_id, "Review deleted");
    Ok(StatusCode::NO_CONTENT)
}
