use crate::models::{
    Amenity, Booking, BookingStatus, Listing, ListingAmenity, Payment, PaymentStatus, Review,
};
use crate::services::store::{
    Constraint, DomainStore, ListingFilter, ReviewFilter, StoreError, StoreResult,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Collection, Database, IndexModel};
use uuid::Uuid;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    listings: Collection<Listing>,
    amenities: Collection<Amenity>,
    listing_amenities: Collection<ListingAmenity>,
    bookings: Collection<Booking>,
    payments: Collection<Payment>,
    reviews: Collection<Review>,
}

fn id_bson(id: Uuid) -> Bson {
    Bson::from(bson::Uuid::from(id))
}

/// Map a duplicate key error to the constraint whose index rejected it.
fn map_write_error(err: mongodb::error::Error) -> StoreError {
    let message = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY => {
            Some(we.message.clone())
        }
        ErrorKind::Command(ce) if ce.code == DUPLICATE_KEY => Some(ce.message.clone()),
        _ => None,
    };

    if let Some(message) = message {
        if let Some(constraint) = Constraint::ALL
            .iter()
            .find(|c| message.contains(c.index_name()))
        {
            return StoreError::ConstraintViolation(*constraint);
        }
        tracing::warn!(%message, "Duplicate key on unnamed index");
    }
    StoreError::from(err)
}

fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn unique_index(keys: Document, constraint: Constraint) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(constraint.index_name().to_string())
                .unique(true)
                .build(),
        )
        .build()
}

fn plain_index(keys: Document, name: &str) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().name(name.to_string()).build())
        .build()
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            listings: db.collection("listings"),
            amenities: db.collection("amenities"),
            listing_amenities: db.collection("listing_amenities"),
            bookings: db.collection("bookings"),
            payments: db.collection("payments"),
            reviews: db.collection("reviews"),
        }
    }

    /// Create the unique indexes that back the store constraints.
    pub async fn init_indexes(&self) -> StoreResult<()> {
        self.listings
            .create_indexes(
                [
                    unique_index(doc! { "slug": 1 }, Constraint::ListingSlug),
                    plain_index(
                        doc! { "is_available": 1, "created_at": -1 },
                        "listing_available_idx",
                    ),
                ],
                None,
            )
            .await?;

        self.listing_amenities
            .create_indexes(
                [unique_index(
                    doc! { "listing_id": 1, "amenity_id": 1 },
                    Constraint::ListingAmenity,
                )],
                None,
            )
            .await?;

        self.bookings
            .create_indexes(
                [plain_index(doc! { "user_id": 1, "created_at": -1 }, "booking_user_idx")],
                None,
            )
            .await?;

        let pending_per_booking = IndexModel::builder()
            .keys(doc! { "booking_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(Constraint::PendingPaymentPerBooking.index_name().to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "status": PaymentStatus::Pending.as_str() })
                    .build(),
            )
            .build();

        self.payments
            .create_indexes(
                [
                    unique_index(doc! { "transaction_ref": 1 }, Constraint::TransactionReference),
                    pending_per_booking,
                    plain_index(doc! { "booking_id": 1, "created_at": 1 }, "payment_booking_idx"),
                ],
                None,
            )
            .await?;

        self.reviews
            .create_indexes(
                [
                    unique_index(
                        doc! { "user_id": 1, "listing_id": 1 },
                        Constraint::ReviewPerListing,
                    ),
                    plain_index(doc! { "listing_id": 1, "created_at": -1 }, "review_listing_idx"),
                ],
                None,
            )
            .await?;

        tracing::info!("Booking service indexes initialized");
        Ok(())
    }

    async fn find_all<T>(
        collection: &Collection<T>,
        filter: Document,
        sort: Document,
        limit: Option<usize>,
    ) -> StoreResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned + Unpin + Send + Sync,
    {
        let options = FindOptions::builder()
            .sort(sort)
            .limit(limit.map(|l| l as i64))
            .build();
        let cursor = collection.find(filter, Some(options)).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl DomainStore for MongoStore {
    async fn ping(&self) -> StoreResult<()> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn create_listing(&self, listing: Listing) -> StoreResult<Listing> {
        self.listings
            .insert_one(&listing, None)
            .await
            .map_err(map_write_error)?;
        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> StoreResult<Listing> {
        self.listings
            .find_one(doc! { "_id": id_bson(id) }, None)
            .await?
            .ok_or(StoreError::NotFound("listing"))
    }

    async fn get_listing_by_slug(&self, slug: &str) -> StoreResult<Listing> {
        self.listings
            .find_one(doc! { "slug": slug }, None)
            .await?
            .ok_or(StoreError::NotFound("listing"))
    }

    async fn list_listings(&self, filter: &ListingFilter) -> StoreResult<Vec<Listing>> {
        let mut query = Document::new();
        if let Some(available) = filter.available {
            query.insert("is_available", available);
        }
        if let Some(location) = &filter.location {
            query.insert(
                "location",
                doc! { "$regex": format!("^{}$", escape_regex(location)), "$options": "i" },
            );
        }
        if let Some(listing_type) = filter.listing_type {
            query.insert("listing_type", listing_type.to_string());
        }
        if let Some(min_guests) = filter.min_guests {
            query.insert("max_guests", doc! { "$gte": i64::from(min_guests) });
        }
        Self::find_all(&self.listings, query, doc! { "created_at": -1 }, filter.limit).await
    }

    async fn update_listing(&self, listing: Listing) -> StoreResult<Listing> {
        let result = self
            .listings
            .replace_one(doc! { "_id": id_bson(listing.id) }, &listing, None)
            .await
            .map_err(map_write_error)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound("listing"));
        }
        Ok(listing)
    }

    async fn create_amenity(&self, amenity: Amenity) -> StoreResult<Amenity> {
        self.amenities
            .insert_one(&amenity, None)
            .await
            .map_err(map_write_error)?;
        Ok(amenity)
    }

    async fn get_amenity(&self, id: Uuid) -> StoreResult<Amenity> {
        self.amenities
            .find_one(doc! { "_id": id_bson(id) }, None)
            .await?
            .ok_or(StoreError::NotFound("amenity"))
    }

    async fn list_amenities(&self) -> StoreResult<Vec<Amenity>> {
        Self::find_all(&self.amenities, doc! {}, doc! { "name": 1 }, None).await
    }

    async fn attach_amenity(&self, listing_id: Uuid, amenity_id: Uuid) -> StoreResult<()> {
        self.get_listing(listing_id).await?;
        self.get_amenity(amenity_id).await?;
        self.listing_amenities
            .insert_one(
                ListingAmenity {
                    listing_id,
                    amenity_id,
                },
                None,
            )
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn amenities_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<Amenity>> {
        let links: Vec<ListingAmenity> = self
            .listing_amenities
            .find(doc! { "listing_id": id_bson(listing_id) }, None)
            .await?
            .try_collect()
            .await?;
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Bson> = links.into_iter().map(|l| id_bson(l.amenity_id)).collect();
        Self::find_all(
            &self.amenities,
            doc! { "_id": { "$in": ids } },
            doc! { "name": 1 },
            None,
        )
        .await
    }

    async fn create_booking(&self, booking: Booking) -> StoreResult<Booking> {
        self.bookings
            .insert_one(&booking, None)
            .await
            .map_err(map_write_error)?;
        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Booking> {
        self.bookings
            .find_one(doc! { "_id": id_bson(id) }, None)
            .await?
            .ok_or(StoreError::NotFound("booking"))
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        Self::find_all(
            &self.bookings,
            doc! { "user_id": user_id },
            doc! { "created_at": -1 },
            None,
        )
        .await
    }

    async fn confirm_booking(&self, id: Uuid) -> StoreResult<bool> {
        let result = self
            .bookings
            .update_one(
                doc! { "_id": id_bson(id), "status": BookingStatus::Pending.as_str() },
                doc! {
                    "$set": {
                        "status": BookingStatus::Confirmed.as_str(),
                        "updated_at": bson::DateTime::now()
                    }
                },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn delete_booking(&self, id: Uuid) -> StoreResult<()> {
        self.payments
            .delete_many(doc! { "booking_id": id_bson(id) }, None)
            .await?;
        let result = self
            .bookings
            .delete_one(doc! { "_id": id_bson(id) }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound("booking"));
        }
        Ok(())
    }

    async fn create_payment(&self, payment: Payment) -> StoreResult<Payment> {
        self.payments
            .insert_one(&payment, None)
            .await
            .map_err(map_write_error)?;
        Ok(payment)
    }

    async fn get_payment_by_reference(&self, transaction_ref: &str) -> StoreResult<Payment> {
        self.payments
            .find_one(doc! { "transaction_ref": transaction_ref }, None)
            .await?
            .ok_or(StoreError::NotFound("payment"))
    }

    async fn list_payments_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>> {
        Self::find_all(
            &self.payments,
            doc! { "booking_id": id_bson(booking_id) },
            doc! { "created_at": 1 },
            None,
        )
        .await
    }

    async fn has_completed_payment(&self, booking_id: Uuid) -> StoreResult<bool> {
        let count = self
            .payments
            .count_documents(
                doc! {
                    "booking_id": id_bson(booking_id),
                    "status": PaymentStatus::Completed.as_str()
                },
                None,
            )
            .await?;
        Ok(count > 0)
    }

    async fn record_checkout_url(
        &self,
        transaction_ref: &str,
        checkout_url: &str,
    ) -> StoreResult<()> {
        self.payments
            .update_one(
                doc! {
                    "transaction_ref": transaction_ref,
                    "status": PaymentStatus::Pending.as_str()
                },
                doc! {
                    "$set": {
                        "checkout_url": checkout_url,
                        "updated_at": bson::DateTime::now()
                    }
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn settle_payment(
        &self,
        transaction_ref: &str,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> StoreResult<Option<Payment>> {
        let mut set = doc! {
            "status": status.as_str(),
            "updated_at": bson::DateTime::now()
        };
        if let Some(reason) = failure_reason {
            set.insert("failure_reason", reason);
        }

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .payments
            .find_one_and_update(
                doc! {
                    "transaction_ref": transaction_ref,
                    "status": PaymentStatus::Pending.as_str()
                },
                doc! { "$set": set },
                Some(options),
            )
            .await?;

        match updated {
            Some(payment) => Ok(Some(payment)),
            None => {
                // Distinguish "already terminal" from "never existed".
                self.get_payment_by_reference(transaction_ref).await?;
                Ok(None)
            }
        }
    }

    async fn create_review(&self, review: Review) -> StoreResult<Review> {
        self.reviews
            .insert_one(&review, None)
            .await
            .map_err(map_write_error)?;
        Ok(review)
    }

    async fn get_review(&self, id: Uuid) -> StoreResult<Review> {
        self.reviews
            .find_one(doc! { "_id": id_bson(id) }, None)
            .await?
            .ok_or(StoreError::NotFound("review"))
    }

    async fn list_reviews(&self, filter: &ReviewFilter) -> StoreResult<Vec<Review>> {
        let mut query = Document::new();
        if let Some(listing_id) = filter.listing_id {
            query.insert("listing_id", id_bson(listing_id));
        }
        if let Some(user_id) = &filter.user_id {
            query.insert("user_id", user_id.as_str());
        }
        if let Some(rating) = filter.rating {
            query.insert("rating", i32::from(rating));
        }
        Self::find_all(&self.reviews, query, doc! { "created_at": -1 }, filter.limit).await
    }

    async fn update_review(&self, review: Review) -> StoreResult<Review> {
        let result = self
            .reviews
            .replace_one(doc! { "_id": id_bson(review.id) }, &review, None)
            .await
            .map_err(map_write_error)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound("review"));
        }
        Ok(review)
    }

    async fn delete_review(&self, id: Uuid) -> StoreResult<()> {
        let result = self
            .reviews
            .delete_one(doc! { "_id": id_bson(id) }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound("review"));
        }
        Ok(())
    }
}
