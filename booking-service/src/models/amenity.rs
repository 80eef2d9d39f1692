use mongodb::bson::serde_helpers::uuid_1_as_binary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Amenity {
    #[serde(rename = "_id", with = "uuid_1_as_binary")]
    pub id: Uuid,
    pub name: String,
    /// Font Awesome icon name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Link between a listing and one of its amenities; unique per pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingAmenity {
    #[serde(with = "uuid_1_as_binary")]
    pub listing_id: Uuid,
    #[serde(with = "uuid_1_as_binary")]
    pub amenity_id: Uuid,
}
