//! Booking and payment state machine.
//!
//! ```text
//! Booking:  pending --(payment verified)--> confirmed
//! Payment:  pending --(verify success)--> completed
//!           pending --(verify failure | initiation failure)--> failed
//! ```
//!
//! Only this module writes `Booking::status` and `Payment::status`. Within a
//! process, status checks and writes for one booking run under a keyed lock;
//! across processes the store's one-pending-payment index and its conditional
//! `pending -> terminal` updates give the same guarantees. Gateway calls are
//! made outside the lock.

use crate::models::{money, Booking, BookingStatus, Payment, PaymentStatus};
use crate::notifications::{templates, NotificationJob, NotificationKind, SharedQueue};
use crate::services::gateway::{
    CheckoutRequest, GatewayResult, SharedGateway, VerificationOutcome,
};
use crate::services::locks::KeyedLocks;
use crate::services::metrics;
use crate::services::store::{Constraint, SharedStore, StoreError};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Title shown on the hosted checkout page. Chapa caps it at 16 characters.
const CHECKOUT_TITLE: &str = "Booking Payment";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("booking is already paid")]
    AlreadyPaid,

    #[error("payment {transaction_ref} is already in progress for this booking")]
    PaymentInProgress {
        transaction_ref: String,
        /// Hosted checkout page of the pending payment, once the gateway gave one.
        checkout_url: Option<String>,
    },

    #[error("{0}")]
    Validation(String),

    #[error("constraint violated: {0}")]
    ConstraintViolation(Constraint),

    #[error("payment initiation failed: {0}")]
    GatewayInitiationFailed(String),

    #[error("payment verification failed: {0}")]
    GatewayVerificationError(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => WorkflowError::NotFound(what),
            StoreError::ConstraintViolation(c) => WorkflowError::ConstraintViolation(c),
            other => WorkflowError::Store(other),
        }
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        match err {
            WorkflowError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            WorkflowError::AlreadyPaid | WorkflowError::Validation(_) => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            WorkflowError::PaymentInProgress { .. } => AppError::Conflict(anyhow::anyhow!(message)),
            WorkflowError::GatewayInitiationFailed(_)
            | WorkflowError::GatewayVerificationError(_) => {
                AppError::Gateway(anyhow::anyhow!(message))
            }
            WorkflowError::ConstraintViolation(_) => {
                AppError::InternalError(anyhow::anyhow!(message))
            }
            WorkflowError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// The caller on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guest {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

impl Guest {
    fn split_name(&self) -> (String, String) {
        let mut parts = self.name.split_whitespace();
        let first = parts.next().unwrap_or("Guest").to_string();
        let last = parts.collect::<Vec<_>>().join(" ");
        (first, last)
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub listing_id: Uuid,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub num_guests: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentInitiation {
    pub checkout_url: String,
    pub transaction_ref: String,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerificationReport {
    pub transaction_ref: String,
    pub payment_status: PaymentStatus,
    pub booking_id: Uuid,
    pub booking_status: BookingStatus,
    /// Whether this call performed the state transition.
    pub applied: bool,
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub currency: String,
    pub public_base_url: String,
    pub return_base_url: String,
    pub callback_secret: Secret<String>,
}

impl WorkflowSettings {
    /// Callback URL carrying an HMAC of the reference so the verify endpoint
    /// can tell its own links from forged ones.
    pub fn callback_url(&self, transaction_ref: &str) -> anyhow::Result<String> {
        let sig = self.callback_signature(transaction_ref)?;
        Ok(format!(
            "{}/payments/verify?tx_ref={}&sig={}",
            self.public_base_url.trim_end_matches('/'),
            transaction_ref,
            sig
        ))
    }

    pub fn callback_signature(&self, transaction_ref: &str) -> anyhow::Result<String> {
        service_core::utils::sign_payload(
            self.callback_secret.expose_secret(),
            transaction_ref.as_bytes(),
        )
    }

    pub fn verify_callback_signature(&self, transaction_ref: &str, sig: &str) -> bool {
        service_core::utils::verify_payload(
            self.callback_secret.expose_secret(),
            transaction_ref.as_bytes(),
            sig,
        )
        .unwrap_or(false)
    }

    fn return_url(&self, booking_id: Uuid) -> String {
        format!(
            "{}/bookings/{}/confirmation",
            self.return_base_url.trim_end_matches('/'),
            booking_id
        )
    }
}

pub struct BookingWorkflow {
    store: SharedStore,
    gateway: SharedGateway,
    queue: SharedQueue,
    locks: KeyedLocks,
    settings: WorkflowSettings,
}

impl BookingWorkflow {
    pub fn new(
        store: SharedStore,
        gateway: SharedGateway,
        queue: SharedQueue,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
            locks: KeyedLocks::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub async fn create_booking(
        &self,
        guest: &Guest,
        request: NewBooking,
    ) -> WorkflowResult<Booking> {
        let listing = self.store.get_listing(request.listing_id).await?;

        if request.check_out_date <= request.check_in_date {
            return Err(WorkflowError::Validation(
                "check_out_date must be after check_in_date".to_string(),
            ));
        }
        if request.num_guests < 1 {
            return Err(WorkflowError::Validation(
                "num_guests must be at least 1".to_string(),
            ));
        }
        if request.num_guests > listing.max_guests {
            return Err(WorkflowError::Validation(format!(
                "listing accepts at most {} guests",
                listing.max_guests
            )));
        }
        if !listing.is_available {
            return Err(WorkflowError::Validation(
                "listing is not available".to_string(),
            ));
        }
        if guest.email.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "an email address is required to book".to_string(),
            ));
        }

        let nights = (request.check_out_date - request.check_in_date).num_days();
        let total_price = listing
            .price_per_night
            .checked_mul(Decimal::from(nights))
            .map(money)
            .ok_or_else(|| {
                WorkflowError::Validation("booking total is out of range".to_string())
            })?;
        let now = Utc::now();

        let booking = self
            .store
            .create_booking(Booking {
                id: Uuid::new_v4(),
                listing_id: listing.id,
                user_id: guest.user_id.clone(),
                guest_email: guest.email.clone(),
                guest_name: guest.name.clone(),
                check_in_date: request.check_in_date,
                check_out_date: request.check_out_date,
                num_guests: request.num_guests,
                total_price,
                status: BookingStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .await?;

        metrics::record_booking_created();
        tracing::info!(
            booking_id = %booking.id,
            listing_id = %listing.id,
            nights,
            total_price = %booking.total_price,
            "Booking created"
        );

        self.notify(NotificationJob::new(
            NotificationKind::BookingCreated,
            booking.id,
            booking.guest_email.clone(),
            templates::booking_created_fields(&booking, &listing),
        ))
        .await;

        Ok(booking)
    }

    pub async fn initiate_payment(
        &self,
        booking_id: Uuid,
        guest: &Guest,
    ) -> WorkflowResult<PaymentInitiation> {
        let booking = self.store.get_booking(booking_id).await?;
        if !booking.is_owned_by(&guest.user_id) {
            return Err(WorkflowError::NotFound("booking"));
        }

        let payment = {
            let _guard = self.locks.lock(booking.id).await;
            let booking = self.store.get_booking(booking_id).await?;

            match booking.status {
                BookingStatus::Pending => {}
                BookingStatus::Confirmed => return Err(WorkflowError::AlreadyPaid),
                status => {
                    return Err(WorkflowError::Validation(format!(
                        "booking is {}",
                        status
                    )))
                }
            }
            if self.store.has_completed_payment(booking.id).await? {
                return Err(WorkflowError::AlreadyPaid);
            }

            let payment = self.create_pending_payment(&booking).await?;

            // Another instance may have completed a payment since the check.
            if self.store.has_completed_payment(booking.id).await? {
                self.store
                    .settle_payment(
                        &payment.transaction_ref,
                        PaymentStatus::Failed,
                        Some("booking already paid".to_string()),
                    )
                    .await?;
                return Err(WorkflowError::AlreadyPaid);
            }
            payment
        };

        tracing::info!(
            booking_id = %booking.id,
            tx_ref = %payment.transaction_ref,
            amount = %payment.amount,
            "Payment created, calling gateway"
        );

        let outcome = match self.checkout_request(&booking, &payment, guest) {
            Ok(request) => self
                .gateway
                .initiate(&request)
                .await
                .map_err(|e| format!("gateway error: {}", e)),
            Err(e) => Err(format!("could not build checkout request: {}", e)),
        };

        match outcome {
            Ok(GatewayResult::Success { checkout_url }) => {
                self.store
                    .record_checkout_url(&payment.transaction_ref, &checkout_url)
                    .await?;
                metrics::record_payment_initiated("success");
                tracing::info!(
                    booking_id = %booking.id,
                    tx_ref = %payment.transaction_ref,
                    "Payment initiated"
                );
                Ok(PaymentInitiation {
                    checkout_url,
                    transaction_ref: payment.transaction_ref,
                    payment_id: payment.id,
                    amount: payment.amount,
                    currency: payment.currency,
                })
            }
            Ok(GatewayResult::Failure { reason }) | Err(reason) => {
                tracing::warn!(
                    booking_id = %booking.id,
                    tx_ref = %payment.transaction_ref,
                    reason = %reason,
                    "Payment initiation failed"
                );
                self.store
                    .settle_payment(
                        &payment.transaction_ref,
                        PaymentStatus::Failed,
                        Some(reason.clone()),
                    )
                    .await?;
                metrics::record_payment_initiated("failed");
                Err(WorkflowError::GatewayInitiationFailed(reason))
            }
        }
    }

    pub async fn verify_payment(
        &self,
        transaction_ref: &str,
    ) -> WorkflowResult<VerificationReport> {
        let payment = self.store.get_payment_by_reference(transaction_ref).await?;

        if payment.status.is_terminal() {
            return self.report_settled(payment).await;
        }

        let outcome = self.gateway.verify(transaction_ref).await.map_err(|e| {
            metrics::record_payment_verified("error");
            tracing::error!(tx_ref = %transaction_ref, error = %e, "Gateway verification error");
            WorkflowError::GatewayVerificationError(e.to_string())
        })?;

        match outcome {
            VerificationOutcome::Pending => {
                metrics::record_payment_verified("pending");
                tracing::info!(tx_ref = %transaction_ref, "Payment still pending at gateway");
                self.report(&payment, false).await
            }
            VerificationOutcome::Failure { reason } => {
                let settled = {
                    let _guard = self.locks.lock(payment.booking_id).await;
                    self.store
                        .settle_payment(
                            transaction_ref,
                            PaymentStatus::Failed,
                            Some(reason.clone()),
                        )
                        .await?
                };
                if settled.is_some() {
                    metrics::record_payment_verified("failed");
                    tracing::info!(tx_ref = %transaction_ref, reason = %reason, "Payment failed");
                }
                let current = self.store.get_payment_by_reference(transaction_ref).await?;
                self.report(&current, settled.is_some()).await
            }
            VerificationOutcome::Success => {
                let (settled, confirmed) = {
                    let _guard = self.locks.lock(payment.booking_id).await;
                    let settled = self
                        .store
                        .settle_payment(transaction_ref, PaymentStatus::Completed, None)
                        .await?;
                    let confirmed = match settled {
                        Some(_) => self.store.confirm_booking(payment.booking_id).await?,
                        None => false,
                    };
                    (settled, confirmed)
                };

                match settled {
                    Some(completed) => {
                        metrics::record_payment_verified("success");
                        if confirmed {
                            tracing::info!(
                                booking_id = %completed.booking_id,
                                tx_ref = %transaction_ref,
                                "Payment completed, booking confirmed"
                            );
                            self.notify_payment_confirmed(&completed).await;
                        } else {
                            tracing::warn!(
                                booking_id = %completed.booking_id,
                                tx_ref = %transaction_ref,
                                "Payment completed but booking was not pending"
                            );
                        }
                        self.report(&completed, true).await
                    }
                    None => {
                        let current = self.store.get_payment_by_reference(transaction_ref).await?;
                        self.report_settled(current).await
                    }
                }
            }
        }
    }

    /// Report a payment that is already terminal. A completed payment whose
    /// booking is still pending was interrupted between the two writes; the
    /// booking is confirmed here and the guest notified.
    async fn report_settled(&self, payment: Payment) -> WorkflowResult<VerificationReport> {
        if payment.status == PaymentStatus::Completed {
            let booking = self.store.get_booking(payment.booking_id).await?;
            if booking.status == BookingStatus::Pending {
                let confirmed = {
                    let _guard = self.locks.lock(payment.booking_id).await;
                    self.store.confirm_booking(payment.booking_id).await?
                };
                if confirmed {
                    tracing::warn!(
                        booking_id = %payment.booking_id,
                        tx_ref = %payment.transaction_ref,
                        "Confirmed booking left pending after its payment completed"
                    );
                    self.notify_payment_confirmed(&payment).await;
                    return self.report(&payment, true).await;
                }
            }
        }

        tracing::debug!(
            tx_ref = %payment.transaction_ref,
            status = %payment.status,
            "Payment already settled"
        );
        self.report(&payment, false).await
    }

    /// Delete a booking the caller owns while it is still pending, together
    /// with its payment history.
    pub async fn delete_booking(&self, booking_id: Uuid, guest: &Guest) -> WorkflowResult<()> {
        let _guard = self.locks.lock(booking_id).await;
        let booking = self.store.get_booking(booking_id).await?;
        if !booking.is_owned_by(&guest.user_id) {
            return Err(WorkflowError::NotFound("booking"));
        }
        if booking.status != BookingStatus::Pending {
            return Err(WorkflowError::Validation(format!(
                "only pending bookings can be deleted, this one is {}",
                booking.status
            )));
        }
        self.store.delete_booking(booking_id).await?;
        tracing::info!(booking_id = %booking_id, "Booking deleted");
        Ok(())
    }

    async fn create_pending_payment(&self, booking: &Booking) -> WorkflowResult<Payment> {
        let mut regenerated = false;
        loop {
            let payment = Payment::new_pending(
                booking.id,
                booking.total_price,
                &self.settings.currency,
                Uuid::new_v4().to_string(),
            );
            match self.store.create_payment(payment).await {
                Ok(payment) => return Ok(payment),
                Err(StoreError::ConstraintViolation(Constraint::TransactionReference))
                    if !regenerated =>
                {
                    tracing::warn!(
                        booking_id = %booking.id,
                        "Transaction reference collision, regenerating"
                    );
                    regenerated = true;
                }
                Err(StoreError::ConstraintViolation(Constraint::PendingPaymentPerBooking)) => {
                    let pending = self
                        .store
                        .list_payments_for_booking(booking.id)
                        .await?
                        .into_iter()
                        .find(|p| p.status == PaymentStatus::Pending);
                    let (transaction_ref, checkout_url) = pending
                        .map(|p| (p.transaction_ref, p.checkout_url))
                        .unwrap_or_default();
                    return Err(WorkflowError::PaymentInProgress {
                        transaction_ref,
                        checkout_url,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn checkout_request(
        &self,
        booking: &Booking,
        payment: &Payment,
        guest: &Guest,
    ) -> anyhow::Result<CheckoutRequest> {
        let (first_name, last_name) = guest.split_name();
        Ok(CheckoutRequest {
            amount: payment.amount,
            currency: payment.currency.clone(),
            payer_email: booking.guest_email.clone(),
            payer_first_name: first_name,
            payer_last_name: last_name,
            transaction_ref: payment.transaction_ref.clone(),
            callback_url: self.settings.callback_url(&payment.transaction_ref)?,
            return_url: self.settings.return_url(booking.id),
            title: CHECKOUT_TITLE.to_string(),
            description: format!("Payment for booking {}", booking.id),
        })
    }

    async fn report(&self, payment: &Payment, applied: bool) -> WorkflowResult<VerificationReport> {
        let booking = self.store.get_booking(payment.booking_id).await?;
        Ok(VerificationReport {
            transaction_ref: payment.transaction_ref.clone(),
            payment_status: payment.status,
            booking_id: booking.id,
            booking_status: booking.status,
            applied,
        })
    }

    async fn notify_payment_confirmed(&self, payment: &Payment) {
        let booking = match self.store.get_booking(payment.booking_id).await {
            Ok(booking) => booking,
            Err(e) => {
                metrics::record_notification_enqueue_failed();
                tracing::error!(
                    tx_ref = %payment.transaction_ref,
                    error = %e,
                    "Cannot load booking for notification"
                );
                return;
            }
        };
        let listing_title = match self.store.get_listing(booking.listing_id).await {
            Ok(listing) => listing.title,
            Err(e) => {
                tracing::warn!(
                    listing_id = %booking.listing_id,
                    error = %e,
                    "Listing missing for notification"
                );
                "your stay".to_string()
            }
        };
        self.notify(NotificationJob::new(
            NotificationKind::PaymentConfirmed,
            payment.id,
            booking.guest_email.clone(),
            templates::payment_confirmed_fields(payment, &booking, &listing_title),
        ))
        .await;
    }

    /// Enqueue a notification. The triggering change is already committed, so
    /// a failure here is logged and counted but not returned.
    async fn notify(&self, job: NotificationJob) {
        let kind = job.kind.as_str();
        let entity_id = job.entity_id;
        match self.queue.enqueue(job).await {
            Ok(handle) => {
                metrics::record_notification_enqueued(kind);
                tracing::info!(
                    job_id = %handle.job_id,
                    kind,
                    entity_id = %entity_id,
                    "Notification enqueued"
                );
            }
            Err(e) => {
                metrics::record_notification_enqueue_failed();
                tracing::error!(
                    kind,
                    entity_id = %entity_id,
                    error = %e,
                    "Failed to enqueue notification"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Listing, ListingType};
    use crate::notifications::{channel_queue, ChannelJobSource};
    use crate::services::gateway::{MockGateway, MockReply};
    use crate::services::memory::InMemoryStore;
    use crate::services::store::DomainStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Harness {
        workflow: Arc<BookingWorkflow>,
        store: Arc<InMemoryStore>,
        gateway: Arc<MockGateway>,
        jobs: ChannelJobSource,
    }

    fn settings() -> WorkflowSettings {
        WorkflowSettings {
            currency: "ETB".to_string(),
            public_base_url: "http://api.local/".to_string(),
            return_base_url: "http://web.local".to_string(),
            callback_secret: Secret::new("callback-secret".to_string()),
        }
    }

    fn harness_with_queue_size(size: usize) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let (queue, jobs) = channel_queue(size);
        let workflow = Arc::new(BookingWorkflow::new(
            store.clone(),
            gateway.clone(),
            Arc::new(queue),
            settings(),
        ));
        Harness {
            workflow,
            store,
            gateway,
            jobs,
        }
    }

    fn harness() -> Harness {
        harness_with_queue_size(64)
    }

    fn guest() -> Guest {
        Guest {
            user_id: "user-1".to_string(),
            email: "sara@example.com".to_string(),
            name: "Sara Tesfaye".to_string(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seed_listing(store: &InMemoryStore, price: Decimal) -> Listing {
        let now = Utc::now();
        store
            .create_listing(Listing {
                id: Uuid::new_v4(),
                title: "Lakeside Villa".to_string(),
                slug: format!("lakeside-villa-{}", Uuid::new_v4()),
                description: "Quiet".to_string(),
                listing_type: ListingType::Villa,
                price_per_night: price,
                location: "Bishoftu".to_string(),
                address: "Lake Road".to_string(),
                max_guests: 4,
                bedrooms: 2,
                bathrooms: 1,
                is_available: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    async fn seed_booking(h: &Harness) -> Booking {
        let listing = seed_listing(&h.store, dec!(100.00)).await;
        let booking = h
            .workflow
            .create_booking(
                &guest(),
                NewBooking {
                    listing_id: listing.id,
                    check_in_date: date(2024, 6, 1),
                    check_out_date: date(2024, 6, 4),
                    num_guests: 2,
                },
            )
            .await
            .unwrap();
        h.jobs.drain().await;
        booking
    }

    #[tokio::test]
    async fn booking_total_is_nights_times_price() {
        let h = harness();
        let listing = seed_listing(&h.store, dec!(100.00)).await;
        let booking = h
            .workflow
            .create_booking(
                &guest(),
                NewBooking {
                    listing_id: listing.id,
                    check_in_date: date(2024, 6, 1),
                    check_out_date: date(2024, 6, 4),
                    num_guests: 2,
                },
            )
            .await
            .unwrap();

        assert_eq!(booking.total_price.to_string(), "300.00");
        assert_eq!(booking.status, BookingStatus::Pending);

        let jobs = h.jobs.drain().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, NotificationKind::BookingCreated);
        assert_eq!(jobs[0].entity_id, booking.id);
        assert_eq!(jobs[0].recipient_email, "sara@example.com");
    }

    #[tokio::test]
    async fn total_price_survives_listing_price_change() {
        let h = harness();
        let booking = seed_booking(&h).await;

        let mut listing = h.store.get_listing(booking.listing_id).await.unwrap();
        listing.price_per_night = dec!(250.00);
        h.store.update_listing(listing).await.unwrap();

        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();
        assert_eq!(initiation.amount, dec!(300.00));
        let stored = h.store.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.total_price, dec!(300.00));
    }

    #[tokio::test]
    async fn invalid_booking_requests_persist_nothing() {
        let h = harness();
        let listing = seed_listing(&h.store, dec!(100.00)).await;
        let cases = [
            (date(2024, 6, 1), date(2024, 6, 1), 2),
            (date(2024, 6, 4), date(2024, 6, 1), 2),
            (date(2024, 6, 1), date(2024, 6, 4), 0),
            (date(2024, 6, 1), date(2024, 6, 4), 5),
        ];
        for (check_in_date, check_out_date, num_guests) in cases {
            let err = h
                .workflow
                .create_booking(
                    &guest(),
                    NewBooking {
                        listing_id: listing.id,
                        check_in_date,
                        check_out_date,
                        num_guests,
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, WorkflowError::Validation(_)), "{:?}", err);
        }
        assert!(h.store.list_bookings_for_user("user-1").await.unwrap().is_empty());
        assert!(h.jobs.drain().await.is_empty());
    }

    #[tokio::test]
    async fn overflowing_total_is_rejected() {
        let h = harness();
        let listing = seed_listing(&h.store, Decimal::MAX / dec!(2)).await;
        let err = h
            .workflow
            .create_booking(
                &guest(),
                NewBooking {
                    listing_id: listing.id,
                    check_in_date: date(2024, 6, 1),
                    check_out_date: date(2024, 6, 4),
                    num_guests: 2,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)), "{:?}", err);
        assert!(h.store.list_bookings_for_user("user-1").await.unwrap().is_empty());
        assert!(h.jobs.drain().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_listing_is_not_found() {
        let h = harness();
        let err = h
            .workflow
            .create_booking(
                &guest(),
                NewBooking {
                    listing_id: Uuid::new_v4(),
                    check_in_date: date(2024, 6, 1),
                    check_out_date: date(2024, 6, 2),
                    num_guests: 1,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound("listing")));
    }

    #[tokio::test]
    async fn pay_then_verify_confirms_booking() {
        let h = harness();
        let booking = seed_booking(&h).await;

        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();
        assert_eq!(initiation.amount.to_string(), "300.00");
        assert_eq!(initiation.currency, "ETB");
        assert!(Uuid::parse_str(&initiation.transaction_ref).is_ok());

        let payment = h
            .store
            .get_payment_by_reference(&initiation.transaction_ref)
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.checkout_url.as_deref(), Some(initiation.checkout_url.as_str()));

        let request = h.gateway.last_request().unwrap();
        let sig = h.workflow.settings().callback_signature(&initiation.transaction_ref).unwrap();
        assert_eq!(
            request.callback_url,
            format!(
                "http://api.local/payments/verify?tx_ref={}&sig={}",
                initiation.transaction_ref, sig
            )
        );
        assert_eq!(
            request.return_url,
            format!("http://web.local/bookings/{}/confirmation", booking.id)
        );
        assert_eq!(request.payer_first_name, "Sara");
        assert_eq!(request.payer_last_name, "Tesfaye");

        let report = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
        assert!(report.applied);
        assert_eq!(report.payment_status, PaymentStatus::Completed);
        assert_eq!(report.booking_status, BookingStatus::Confirmed);

        let jobs = h.jobs.drain().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, NotificationKind::PaymentConfirmed);
        assert_eq!(jobs[0].entity_id, payment.id);
        assert_eq!(jobs[0].template_fields["amount"], "300.00");
    }

    #[tokio::test]
    async fn verify_is_idempotent() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();

        let first = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
        for _ in 0..3 {
            let again = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
            assert!(!again.applied);
            assert_eq!(again.payment_status, PaymentStatus::Completed);
            assert_eq!(again.booking_status, BookingStatus::Confirmed);
        }
        assert!(first.applied);
        assert_eq!(h.gateway.verify_calls(), 1);
        assert_eq!(h.jobs.drain().await.len(), 1);
    }

    #[tokio::test]
    async fn verify_confirms_booking_left_pending_by_completed_payment() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();

        // Payment settled but the process stopped before confirming the booking.
        h.store
            .settle_payment(&initiation.transaction_ref, PaymentStatus::Completed, None)
            .await
            .unwrap()
            .unwrap();
        let err = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyPaid));

        let report = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
        assert!(report.applied);
        assert_eq!(report.payment_status, PaymentStatus::Completed);
        assert_eq!(report.booking_status, BookingStatus::Confirmed);
        assert_eq!(h.gateway.verify_calls(), 0);
        assert_eq!(
            h.store.get_booking(booking.id).await.unwrap().status,
            BookingStatus::Confirmed
        );

        let jobs = h.jobs.drain().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, NotificationKind::PaymentConfirmed);

        let again = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
        assert!(!again.applied);
        assert!(h.jobs.drain().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_verifies_confirm_once() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let workflow = h.workflow.clone();
            let tx_ref = initiation.transaction_ref.clone();
            handles.push(tokio::spawn(async move {
                workflow.verify_payment(&tx_ref).await.unwrap()
            }));
        }
        let mut applied = 0;
        for handle in handles {
            let report = handle.await.unwrap();
            assert_eq!(report.payment_status, PaymentStatus::Completed);
            if report.applied {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(h.jobs.drain().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let h = harness();
        let err = h.workflow.verify_payment("bogus").await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound("payment")));
        assert_eq!(h.gateway.verify_calls(), 0);
    }

    #[tokio::test]
    async fn confirmed_booking_rejects_new_payment() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();
        h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();

        let err = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyPaid));
        assert_eq!(h.store.list_payments_for_booking(booking.id).await.unwrap().len(), 1);
        assert_eq!(h.gateway.initiate_calls(), 1);
    }

    #[tokio::test]
    async fn pending_payment_blocks_second_initiation() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let first = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();

        let err = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap_err();
        match err {
            WorkflowError::PaymentInProgress {
                transaction_ref,
                checkout_url,
            } => {
                assert_eq!(transaction_ref, first.transaction_ref);
                assert_eq!(checkout_url.as_deref(), Some(first.checkout_url.as_str()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrent_initiations_create_one_pending_payment() {
        let h = harness();
        let booking = seed_booking(&h).await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let workflow = h.workflow.clone();
            handles.push(tokio::spawn(async move {
                workflow.initiate_payment(booking.id, &guest()).await
            }));
        }
        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(WorkflowError::PaymentInProgress { .. }) => {}
                Err(other) => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(successes, 1);
        let pending = h
            .store
            .list_payments_for_booking(booking.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Pending)
            .count();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn non_owner_sees_not_found() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let stranger = Guest {
            user_id: "user-2".to_string(),
            ..guest()
        };
        let err = h.workflow.initiate_payment(booking.id, &stranger).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound("booking")));
        assert!(h.store.list_payments_for_booking(booking.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gateway_rejection_fails_payment_and_allows_retry() {
        let h = harness();
        let booking = seed_booking(&h).await;
        h.gateway.push_initiate(MockReply::Ok(GatewayResult::Failure {
            reason: "invalid currency".into(),
        }));

        let err = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::GatewayInitiationFailed(_)));

        let payments = h.store.list_payments_for_booking(booking.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
        assert_eq!(payments[0].failure_reason.as_deref(), Some("invalid currency"));

        let retry = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();
        assert_ne!(retry.transaction_ref, payments[0].transaction_ref);
    }

    #[tokio::test]
    async fn gateway_error_on_initiation_fails_payment() {
        let h = harness();
        let booking = seed_booking(&h).await;
        h.gateway.push_initiate(MockReply::Error("connection reset".into()));

        let err = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::GatewayInitiationFailed(_)));
        let payments = h.store.list_payments_for_booking(booking.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn gateway_error_on_verify_leaves_payment_pending() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();
        h.gateway.push_verify(MockReply::Error("timeout".into()));

        let err = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap_err();
        assert!(matches!(err, WorkflowError::GatewayVerificationError(_)));
        let payment = h
            .store
            .get_payment_by_reference(&initiation.transaction_ref)
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);

        // Retrying once the gateway recovers succeeds.
        let report = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
        assert!(report.applied);
        assert_eq!(report.booking_status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn gateway_pending_changes_nothing() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();
        h.gateway.push_verify(MockReply::Ok(VerificationOutcome::Pending));

        let report = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
        assert!(!report.applied);
        assert_eq!(report.payment_status, PaymentStatus::Pending);
        assert_eq!(report.booking_status, BookingStatus::Pending);
        assert!(h.jobs.drain().await.is_empty());
    }

    #[tokio::test]
    async fn failed_verification_keeps_booking_pending() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();
        h.gateway.push_verify(MockReply::Ok(VerificationOutcome::Failure {
            reason: "card declined".into(),
        }));

        let report = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
        assert!(report.applied);
        assert_eq!(report.payment_status, PaymentStatus::Failed);
        assert_eq!(report.booking_status, BookingStatus::Pending);

        // Terminal: a later success from the gateway is never consulted.
        let again = h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();
        assert_eq!(again.payment_status, PaymentStatus::Failed);
        assert_eq!(h.gateway.verify_calls(), 1);
        assert!(h.jobs.drain().await.is_empty());
    }

    #[tokio::test]
    async fn enqueue_failure_does_not_fail_booking() {
        let h = harness_with_queue_size(1);
        let listing = seed_listing(&h.store, dec!(80.00)).await;
        let request = NewBooking {
            listing_id: listing.id,
            check_in_date: date(2024, 7, 1),
            check_out_date: date(2024, 7, 2),
            num_guests: 1,
        };
        h.workflow.create_booking(&guest(), request.clone()).await.unwrap();
        // The queue now holds one job and is full.
        let second = h.workflow.create_booking(&guest(), request).await.unwrap();
        assert_eq!(second.total_price, dec!(80.00));
        assert_eq!(h.store.list_bookings_for_user("user-1").await.unwrap().len(), 2);
        assert_eq!(h.jobs.drain().await.len(), 1);
    }

    #[tokio::test]
    async fn only_pending_bookings_can_be_deleted() {
        let h = harness();
        let booking = seed_booking(&h).await;
        let initiation = h.workflow.initiate_payment(booking.id, &guest()).await.unwrap();
        h.workflow.verify_payment(&initiation.transaction_ref).await.unwrap();

        let err = h.workflow.delete_booking(booking.id, &guest()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        let other = seed_booking(&h).await;
        h.workflow.initiate_payment(other.id, &guest()).await.unwrap();
        h.workflow.delete_booking(other.id, &guest()).await.unwrap();
        assert!(h.store.list_payments_for_booking(other.id).await.unwrap().is_empty());
    }

    #[test]
    fn errors_map_to_http_statuses() {
        use axum::http::StatusCode;
        let cases = [
            (WorkflowError::NotFound("booking"), StatusCode::NOT_FOUND),
            (WorkflowError::AlreadyPaid, StatusCode::BAD_REQUEST),
            (
                WorkflowError::PaymentInProgress {
                    transaction_ref: "r".into(),
                    checkout_url: None,
                },
                StatusCode::CONFLICT,
            ),
            (WorkflowError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                WorkflowError::GatewayInitiationFailed("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                WorkflowError::ConstraintViolation(Constraint::TransactionReference),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn callback_signature_round_trips() {
        let settings = settings();
        let sig = settings.callback_signature("tx-1").unwrap();
        assert!(settings.verify_callback_signature("tx-1", &sig));
        assert!(!settings.verify_callback_signature("tx-2", &sig));
    }
}
