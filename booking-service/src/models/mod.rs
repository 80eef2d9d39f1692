mod amenity;
mod booking;
mod listing;
mod payment;
mod review;

pub use amenity::{Amenity, ListingAmenity};
pub use booking::{Booking, BookingStatus};
pub use listing::{Listing, ListingType};
pub use payment::{Payment, PaymentStatus};
pub use review::Review;

use rust_decimal::Decimal;

/// Normalise a monetary value to exactly two fraction digits.
pub fn money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp(2);
    rounded.rescale(2);
    rounded
}

// Helper module for optional Uuid as BSON binary
pub(crate) mod opt_uuid_as_binary {
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use uuid::Uuid;

    pub fn serialize<S>(id: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match id {
            Some(id) => bson::Uuid::from(*id).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::Uuid> = Option::deserialize(deserializer)?;
        Ok(opt.map(Uuid::from))
    }
}
