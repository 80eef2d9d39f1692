//! Domain store contract.
//!
//! Everything the service persists goes through [`DomainStore`]. Status
//! transitions are exposed only as conditional, atomic operations
//! (`settle_payment`, `confirm_booking`) so two concurrent callers can never
//! both observe a record as pending and both act on it.

use crate::models::{Amenity, Booking, Listing, ListingType, Payment, PaymentStatus, Review};
use async_trait::async_trait;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Uniqueness invariants enforced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    ListingSlug,
    ListingAmenity,
    ReviewPerListing,
    TransactionReference,
    PendingPaymentPerBooking,
}

impl Constraint {
    /// Index name used by the Mongo backend.
    pub fn index_name(&self) -> &'static str {
        match self {
            Constraint::ListingSlug => "listing_slug_idx",
            Constraint::ListingAmenity => "listing_amenity_idx",
            Constraint::ReviewPerListing => "review_user_listing_idx",
            Constraint::TransactionReference => "payment_reference_idx",
            Constraint::PendingPaymentPerBooking => "payment_pending_booking_idx",
        }
    }

    pub const ALL: [Constraint; 5] = [
        Constraint::ListingSlug,
        Constraint::ListingAmenity,
        Constraint::ReviewPerListing,
        Constraint::TransactionReference,
        Constraint::PendingPaymentPerBooking,
    ];
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Constraint::ListingSlug => "listing slug must be unique",
            Constraint::ListingAmenity => "amenity already attached to listing",
            Constraint::ReviewPerListing => "one review per user and listing",
            Constraint::TransactionReference => "transaction reference must be unique",
            Constraint::PendingPaymentPerBooking => "booking already has a pending payment",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("constraint violated: {0}")]
    ConstraintViolation(Constraint),

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            StoreError::ConstraintViolation(c) => AppError::Conflict(anyhow::anyhow!("{}", c)),
            StoreError::Backend(e) => AppError::DatabaseError(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub available: Option<bool>,
    pub location: Option<String>,
    pub listing_type: Option<ListingType>,
    pub min_guests: Option<u32>,
    pub limit: Option<usize>,
}

impl ListingFilter {
    pub fn matches(&self, listing: &Listing) -> bool {
        self.available.map_or(true, |a| listing.is_available == a)
            && self
                .location
                .as_deref()
                .map_or(true, |l| listing.location.eq_ignore_ascii_case(l))
            && self.listing_type.map_or(true, |t| listing.listing_type == t)
            && self.min_guests.map_or(true, |g| listing.max_guests >= g)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub listing_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub rating: Option<u8>,
    pub limit: Option<usize>,
}

impl ReviewFilter {
    pub fn matches(&self, review: &Review) -> bool {
        self.listing_id.map_or(true, |id| review.listing_id == id)
            && self
                .user_id
                .as_deref()
                .map_or(true, |u| review.user_id == u)
            && self.rating.map_or(true, |r| review.rating == r)
    }
}

#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    // Listings
    async fn create_listing(&self, listing: Listing) -> StoreResult<Listing>;
    async fn get_listing(&self, id: Uuid) -> StoreResult<Listing>;
    async fn get_listing_by_slug(&self, slug: &str) -> StoreResult<Listing>;
    /// Newest first.
    async fn list_listings(&self, filter: &ListingFilter) -> StoreResult<Vec<Listing>>;
    async fn update_listing(&self, listing: Listing) -> StoreResult<Listing>;

    // Amenities
    async fn create_amenity(&self, amenity: Amenity) -> StoreResult<Amenity>;
    async fn get_amenity(&self, id: Uuid) -> StoreResult<Amenity>;
    async fn list_amenities(&self) -> StoreResult<Vec<Amenity>>;
    async fn attach_amenity(&self, listing_id: Uuid, amenity_id: Uuid) -> StoreResult<()>;
    async fn amenities_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<Amenity>>;

    // Bookings
    async fn create_booking(&self, booking: Booking) -> StoreResult<Booking>;
    async fn get_booking(&self, id: Uuid) -> StoreResult<Booking>;
    /// Newest first.
    async fn list_bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>>;
    /// Atomically move a pending booking to confirmed. Returns `false` when the
    /// booking was not pending.
    async fn confirm_booking(&self, id: Uuid) -> StoreResult<bool>;
    /// Delete a booking together with its payment history.
    async fn delete_booking(&self, id: Uuid) -> StoreResult<()>;

    // Payments
    async fn create_payment(&self, payment: Payment) -> StoreResult<Payment>;
    async fn get_payment_by_reference(&self, transaction_ref: &str) -> StoreResult<Payment>;
    /// Oldest first.
    async fn list_payments_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>>;
    async fn has_completed_payment(&self, booking_id: Uuid) -> StoreResult<bool>;
    /// Attach the gateway checkout URL to a pending payment.
    async fn record_checkout_url(&self, transaction_ref: &str, checkout_url: &str)
        -> StoreResult<()>;
    /// Atomically move a pending payment to a terminal status.
    ///
    /// Returns the updated payment when this call performed the transition and
    /// `None` when the payment was already terminal.
    async fn settle_payment(
        &self,
        transaction_ref: &str,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> StoreResult<Option<Payment>>;

    // Reviews
    async fn create_review(&self, review: Review) -> StoreResult<Review>;
    async fn get_review(&self, id: Uuid) -> StoreResult<Review>;
    /// Newest first.
    async fn list_reviews(&self, filter: &ReviewFilter) -> StoreResult<Vec<Review>>;
    async fn update_review(&self, review: Review) -> StoreResult<Review>;
    async fn delete_review(&self, id: Uuid) -> StoreResult<()>;
}

pub type SharedStore = Arc<dyn DomainStore>;
