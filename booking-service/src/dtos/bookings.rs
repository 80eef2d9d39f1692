use crate::models::{Booking, BookingStatus, Payment, PaymentStatus};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /bookings`. Date and guest checks happen in the workflow.
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub listing_id: Uuid,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub num_guests: u32,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub user_id: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub num_guests: u32,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            listing_id: b.listing_id,
            user_id: b.user_id,
            check_in_date: b.check_in_date,
            check_out_date: b.check_out_date,
            num_guests: b.num_guests,
            total_price: b.total_price,
            status: b.status,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_ref: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 409 body of `POST /bookings/:id/pay` while an earlier payment is pending,
/// so the client can resume that checkout.
#[derive(Debug, Serialize)]
pub struct PaymentInProgressResponse {
    pub error: String,
    pub transaction_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            booking_id: p.booking_id,
            amount: p.amount,
            currency: p.currency,
            transaction_ref: p.transaction_ref,
            status: p.status,
            failure_reason: p.failure_reason,
            checkout_url: p.checkout_url,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Query of the gateway callback. Chapa has used both `tx_ref` and `trx_ref`.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    pub tx_ref: Option<String>,
    pub trx_ref: Option<String>,
    pub sig: Option<String>,
}

impl VerifyQuery {
    pub fn reference(&self) -> Option<&str> {
        self.tx_ref
            .as_deref()
            .or(self.trx_ref.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(alias = "trx_ref")]
    pub tx_ref: String,
    #[serde(default)]
    pub status: Option<String>,
}
