use crate::models::Review;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReviewRequest {
    pub listing_id: Uuid,
    pub booking_id: Option<Uuid>,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: u8,
    #[validate(length(min = 1, message = "Comment cannot be empty"))]
    pub comment: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateReviewRequest {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: Option<u8>,
    #[validate(length(min = 1, message = "Comment cannot be empty"))]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    pub listing_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub rating: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub user_id: String,
    pub listing_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Review> for ReviewResponse {
    fn from(r: Review) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            listing_id: r.listing_id,
            booking_id: r.booking_id,
            rating: r.rating,
            comment: r.comment,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
