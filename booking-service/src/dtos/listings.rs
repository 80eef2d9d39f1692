use crate::models::{Amenity, Listing, ListingType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateListingRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    /// Derived from the title when absent.
    #[validate(length(min = 1, max = 220, message = "Slug must be 1-220 characters"))]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    pub listing_type: ListingType,
    pub price_per_night: Decimal,
    #[validate(length(min = 1, max = 200, message = "Location is required"))]
    pub location: String,
    #[serde(default)]
    pub address: String,
    #[validate(range(min = 1, message = "A listing must host at least one guest"))]
    pub max_guests: u32,
    #[serde(default)]
    pub bedrooms: u32,
    #[serde(default)]
    pub bathrooms: u32,
    pub is_available: Option<bool>,
}

/// Partial update. The slug is fixed at creation and can't be changed here.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateListingRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub listing_type: Option<ListingType>,
    pub price_per_night: Option<Decimal>,
    #[validate(length(min = 1, max = 200, message = "Location cannot be empty"))]
    pub location: Option<String>,
    pub address: Option<String>,
    #[validate(range(min = 1, message = "A listing must host at least one guest"))]
    pub max_guests: Option<u32>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub available: Option<bool>,
    pub location: Option<String>,
    pub listing_type: Option<ListingType>,
    pub min_guests: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListingResponse {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amenities: Option<Vec<AmenityResponse>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListingResponse {
    pub fn with_amenities(listing: Listing, amenities: Vec<Amenity>) -> Self {
        let mut response = Self::from(listing);
        response.amenities = Some(amenities.into_iter().map(AmenityResponse::from).collect());
        response
    }
}

impl From<Listing> for ListingResponse {
    fn from(l: Listing) -> Self {
        Self {
            id: l.id,
            title: l.title,
            slug: l.slug,
            description: l.description,
            listing_type: l.listing_type,
            price_per_night: l.price_per_night,
            location: l.location,
            address: l.address,
            max_guests: l.max_guests,
            bedrooms: l.bedrooms,
            bathrooms: l.bathrooms,
            is_available: l.is_available,
            amenities: None,
            created_at: l.created_at,
            updated_at: l.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAmenityRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 50, message = "Icon must be 1-50 characters"))]
    pub icon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttachAmenityRequest {
    pub amenity_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AmenityResponse {
    pub id: Uuid,
    pub name: String,
    pub icon: Option<String>,
}

impl From<Amenity> for AmenityResponse {
    fn from(a: Amenity) -> Self {
        Self {
            id: a.id,
            name: a.name,
            icon: a.icon,
        }
    }
}
