//! Booking handlers. Every route here needs a caller identity.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{
    BookingResponse, CreateBookingRequest, PaymentInProgressResponse, PaymentResponse,
};
use crate::middleware::UserContext;
use crate::models::{Booking, BookingStatus};
use crate::workflow::{NewBooking, WorkflowError};
use crate::AppState;

/// Load a booking the caller may see. Other users' bookings look missing.
async fn visible_booking(
    state: &AppState,
    user: &UserContext,
    booking_id: Uuid,
) -> Result<Booking, AppError> {
    let booking = state.store.get_booking(booking_id).await?;
    if !booking.is_owned_by(&user.user_id) && !user.is_staff() {
        return Err(AppError::NotFound(anyhow::anyhow!("booking not found")));
    }
    Ok(booking)
}

/// POST /bookings
#[tracing::instrument(skip_all, fields(listing_id = %req.listing_id))]
pub async fn create_booking(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let booking = state
        .workflow
        .create_booking(
            &user.guest(),
            NewBooking {
                listing_id: req.listing_id,
                check_in_date: req.check_in_date,
                check_out_date: req.check_out_date,
                num_guests: req.num_guests,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(BookingResponse::from(booking))))
}

/// GET /bookings
pub async fn list_my_bookings(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let bookings = state.store.list_bookings_for_user(&user.user_id).await?;
    Ok(Json(bookings.into_iter().map(BookingResponse::from).collect()))
}

/// GET /bookings/upcoming
///
/// Pending or confirmed stays that haven't started yet, soonest first.
pub async fn upcoming_bookings(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let today = Utc::now().date_naive();
    let mut bookings: Vec<Booking> = state
        .store
        .list_bookings_for_user(&user.user_id)
        .await?
        .into_iter()
        .filter(|b| {
            b.check_in_date >= today
                && matches!(b.status, BookingStatus::Pending | BookingStatus::Confirmed)
        })
        .collect();
    bookings.sort_by_key(|b| b.check_in_date);

    Ok(Json(bookings.into_iter().map(BookingResponse::from).collect()))
}

/// GET /bookings/:id
pub async fn get_booking(
    State(state): State<AppState>,
    user: UserContext,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = visible_booking(&state, &user, booking_id).await?;
    Ok(Json(BookingResponse::from(booking)))
}

/// DELETE /bookings/:id
#[tracing::instrument(skip(state, user))]
pub async fn delete_booking(
    State(state): State<AppState>,
    user: UserContext,
    Path(booking_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .workflow
        .delete_booking(booking_id, &user.guest())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /bookings/:id/payments
pub async fn booking_payments(
    State(state): State<AppState>,
    user: UserContext,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Vec<PaymentResponse>>, AppError> {
    let booking = visible_booking(&state, &user, booking_id).await?;
    let payments = state.store.list_payments_for_booking(booking.id).await?;
    Ok(Json(payments.into_iter().map(PaymentResponse::from).collect()))
}

/// POST /bookings/:id/pay
///
/// A pending payment answers 409 with its reference and checkout URL.
#[tracing::instrument(skip(state, user))]
pub async fn initiate_payment(
    State(state): State<AppState>,
    user: UserContext,
    Path(booking_id): Path<Uuid>,
) -> Result<Response, AppError> {
    match state
        .workflow
        .initiate_payment(booking_id, &user.guest())
        .await
    {
        Ok(initiation) => Ok(Json(initiation).into_response()),
        Err(WorkflowError::PaymentInProgress {
            transaction_ref,
            checkout_url,
        }) => Ok((
            StatusCode::CONFLICT,
            Json(PaymentInProgressResponse {
                error: "a payment is already in progress for this booking".to_string(),
                transaction_ref,
                checkout_url,
            }),
        )
            .into_response()),
        Err(err) => Err(err.into()),
    }
}
