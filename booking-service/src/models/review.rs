use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::{chrono_datetime_as_bson_datetime, uuid_1_as_binary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's rating of a listing; one per (user, listing).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    #[serde(rename = "_id", with = "uuid_1_as_binary")]
    pub id: Uuid,
    pub user_id: String,
    #[serde(with = "uuid_1_as_binary")]
    pub listing_id: Uuid,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::opt_uuid_as_binary"
    )]
    pub booking_id: Option<Uuid>,
    pub rating: u8,
    pub comment: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}
