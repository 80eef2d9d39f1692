use crate::models::{
    Amenity, Booking, BookingStatus, Listing, ListingAmenity, Payment, PaymentStatus, Review,
};
use crate::services::store::{
    Constraint, DomainStore, ListingFilter, ReviewFilter, StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    listings: HashMap<Uuid, Listing>,
    amenities: HashMap<Uuid, Amenity>,
    listing_amenities: Vec<ListingAmenity>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<String, Payment>,
    reviews: HashMap<Uuid, Review>,
}

/// Store used for local development and tests.
///
/// A single lock guards every table, so each operation is atomic with respect
/// to all others and the uniqueness checks can't race their inserts.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(mut items: Vec<T>, key: F, limit: Option<usize>) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

#[async_trait]
impl DomainStore for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_listing(&self, listing: Listing) -> StoreResult<Listing> {
        let mut tables = self.tables.write().await;
        if tables.listings.values().any(|l| l.slug == listing.slug) {
            return Err(StoreError::ConstraintViolation(Constraint::ListingSlug));
        }
        tables.listings.insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> StoreResult<Listing> {
        self.tables
            .read()
            .await
            .listings
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("listing"))
    }

    async fn get_listing_by_slug(&self, slug: &str) -> StoreResult<Listing> {
        self.tables
            .read()
            .await
            .listings
            .values()
            .find(|l| l.slug == slug)
            .cloned()
            .ok_or(StoreError::NotFound("listing"))
    }

    async fn list_listings(&self, filter: &ListingFilter) -> StoreResult<Vec<Listing>> {
        let tables = self.tables.read().await;
        let matching = tables
            .listings
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        Ok(newest_first(matching, |l| l.created_at, filter.limit))
    }

    async fn update_listing(&self, listing: Listing) -> StoreResult<Listing> {
        let mut tables = self.tables.write().await;
        if tables
            .listings
            .values()
            .any(|l| l.slug == listing.slug && l.id != listing.id)
        {
            return Err(StoreError::ConstraintViolation(Constraint::ListingSlug));
        }
        match tables.listings.get_mut(&listing.id) {
            Some(existing) => {
                *existing = listing.clone();
                Ok(listing)
            }
            None => Err(StoreError::NotFound("listing")),
        }
    }

    async fn create_amenity(&self, amenity: Amenity) -> StoreResult<Amenity> {
        let mut tables = self.tables.write().await;
        tables.amenities.insert(amenity.id, amenity.clone());
        Ok(amenity)
    }

    async fn get_amenity(&self, id: Uuid) -> StoreResult<Amenity> {
        self.tables
            .read()
            .await
            .amenities
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("amenity"))
    }

    async fn list_amenities(&self) -> StoreResult<Vec<Amenity>> {
        let tables = self.tables.read().await;
        let mut amenities: Vec<Amenity> = tables.amenities.values().cloned().collect();
        amenities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(amenities)
    }

    async fn attach_amenity(&self, listing_id: Uuid, amenity_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.listings.contains_key(&listing_id) {
            return Err(StoreError::NotFound("listing"));
        }
        if !tables.amenities.contains_key(&amenity_id) {
            return Err(StoreError::NotFound("amenity"));
        }
        if tables
            .listing_amenities
            .iter()
            .any(|la| la.listing_id == listing_id && la.amenity_id == amenity_id)
        {
            return Err(StoreError::ConstraintViolation(Constraint::ListingAmenity));
        }
        tables.listing_amenities.push(ListingAmenity {
            listing_id,
            amenity_id,
        });
        Ok(())
    }

    async fn amenities_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<Amenity>> {
        let tables = self.tables.read().await;
        let mut amenities: Vec<Amenity> = tables
            .listing_amenities
            .iter()
            .filter(|la| la.listing_id == listing_id)
            .filter_map(|la| tables.amenities.get(&la.amenity_id).cloned())
            .collect();
        amenities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(amenities)
    }

    async fn create_booking(&self, booking: Booking) -> StoreResult<Booking> {
        let mut tables = self.tables.write().await;
        tables.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Booking> {
        self.tables
            .read()
            .await
            .bookings
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("booking"))
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let tables = self.tables.read().await;
        let bookings = tables
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(bookings, |b| b.created_at, None))
    }

    async fn confirm_booking(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let booking = tables
            .bookings
            .get_mut(&id)
            .ok_or(StoreError::NotFound("booking"))?;
        if booking.status != BookingStatus::Pending {
            return Ok(false);
        }
        booking.status = BookingStatus::Confirmed;
        booking.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_booking(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.bookings.remove(&id).is_none() {
            return Err(StoreError::NotFound("booking"));
        }
        tables.payments.retain(|_, p| p.booking_id != id);
        Ok(())
    }

    async fn create_payment(&self, payment: Payment) -> StoreResult<Payment> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(&payment.transaction_ref) {
            return Err(StoreError::ConstraintViolation(
                Constraint::TransactionReference,
            ));
        }
        if payment.status == PaymentStatus::Pending
            && tables
                .payments
                .values()
                .any(|p| p.booking_id == payment.booking_id && p.status == PaymentStatus::Pending)
        {
            return Err(StoreError::ConstraintViolation(
                Constraint::PendingPaymentPerBooking,
            ));
        }
        tables
            .payments
            .insert(payment.transaction_ref.clone(), payment.clone());
        Ok(payment)
    }

    async fn get_payment_by_reference(&self, transaction_ref: &str) -> StoreResult<Payment> {
        self.tables
            .read()
            .await
            .payments
            .get(transaction_ref)
            .cloned()
            .ok_or(StoreError::NotFound("payment"))
    }

    async fn list_payments_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn has_completed_payment(&self, booking_id: Uuid) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .any(|p| p.booking_id == booking_id && p.status == PaymentStatus::Completed))
    }

    async fn record_checkout_url(
        &self,
        transaction_ref: &str,
        checkout_url: &str,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let payment = tables
            .payments
            .get_mut(transaction_ref)
            .ok_or(StoreError::NotFound("payment"))?;
        if payment.status == PaymentStatus::Pending {
            payment.checkout_url = Some(checkout_url.to_string());
            payment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn settle_payment(
        &self,
        transaction_ref: &str,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> StoreResult<Option<Payment>> {
        let mut tables = self.tables.write().await;
        let payment = tables
            .payments
            .get_mut(transaction_ref)
            .ok_or(StoreError::NotFound("payment"))?;
        if payment.status.is_terminal() {
            return Ok(None);
        }
        payment.status = status;
        if failure_reason.is_some() {
            payment.failure_reason = failure_reason;
        }
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn create_review(&self, review: Review) -> StoreResult<Review> {
        let mut tables = self.tables.write().await;
        if tables
            .reviews
            .values()
            .any(|r| r.user_id == review.user_id && r.listing_id == review.listing_id)
        {
            return Err(StoreError::ConstraintViolation(Constraint::ReviewPerListing));
        }
        tables.reviews.insert(review.id, review.clone());
        Ok(review)
    }

    async fn get_review(&self, id: Uuid) -> StoreResult<Review> {
        self.tables
            .read()
            .await
            .reviews
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("review"))
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> StoreResult<Vec<Review>> {
        let tables = self.tables.read().await;
        let matching = tables
            .reviews
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(newest_first(matching, |r| r.created_at, filter.limit))
    }

    async fn update_review(&self, review: Review) -> StoreResult<Review> {
        let mut tables = self.tables.write().await;
        match tables.reviews.get_mut(&review.id) {
            Some(existing) => {
                *existing = review.clone();
                Ok(review)
            }
            None => Err(StoreError::NotFound("review")),
        }
    }

    async fn delete_review(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .reviews
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound("review"))
    }
}
