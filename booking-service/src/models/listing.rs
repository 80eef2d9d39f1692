use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::{chrono_datetime_as_bson_datetime, uuid_1_as_binary};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Hotel,
    Apartment,
    Villa,
    Resort,
    Hostel,
}

impl std::fmt::Display for ListingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingType::Hotel => write!(f, "hotel"),
            ListingType::Apartment => write!(f, "apartment"),
            ListingType::Villa => write!(f, "villa"),
            ListingType::Resort => write!(f, "resort"),
            ListingType::Hostel => write!(f, "hostel"),
        }
    }
}

/// A bookable property.
///
/// `slug` is assigned once at creation and survives title edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    #[serde(rename = "_id", with = "uuid_1_as_binary")]
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub listing_type: ListingType,
    pub price_per_night: Decimal,
    pub location: String,
    pub address: String,
    pub max_guests: u32,
    pub bedrooms: u32,
    pub bathrooms: u32,
    pub is_available: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}
