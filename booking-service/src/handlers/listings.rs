//! Listing handlers.
//!
//! Reads are public. Creating, editing and attaching amenities require the
//! staff role.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    AttachAmenityRequest, CreateListingRequest, ListingQuery, ListingResponse,
    UpdateListingRequest,
};
use crate::middleware::StaffUser;
use crate::models::{money, Listing};
use crate::services::store::ListingFilter;
use crate::utils::slugify;
use crate::AppState;

const FEATURED_LIMIT: usize = 5;

/// Highest nightly price a listing may carry.
const MAX_PRICE_PER_NIGHT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

fn check_price(price: Decimal) -> Result<Decimal, AppError> {
    if price.is_sign_negative() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "price_per_night cannot be negative"
        )));
    }
    if price > MAX_PRICE_PER_NIGHT {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "price_per_night cannot exceed {}",
            MAX_PRICE_PER_NIGHT
        )));
    }
    Ok(money(price))
}

/// POST /listings
#[tracing::instrument(skip_all, fields(title = %req.title))]
pub async fn create_listing(
    State(state): State<AppState>,
    StaffUser(staff): StaffUser,
    Json(req): Json<CreateListingRequest>,
) -> Result<(StatusCode, Json<ListingResponse>), AppError> {
    req.validate()?;

    let slug = slugify(req.slug.as_deref().unwrap_or(&req.title));
    if slug.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Cannot derive a slug from '{}'",
            req.title
        )));
    }

    let now = Utc::now();
    let listing = Listing {
        id: Uuid::new_v4(),
        title: req.title,
        slug,
        description: req.description,
        listing_type: req.listing_type,
        price_per_night: check_price(req.price_per_night)?,
        location: req.location,
        address: req.address,
        max_guests: req.max_guests,
        bedrooms: req.bedrooms,
        bathrooms: req.bathrooms,
        is_available: req.is_available.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };

    let listing = state.store.create_listing(listing).await?;

    tracing::info!(
        listing_id = %listing.id,
        slug = %listing.slug,
        created_by = %staff.user_id,
        "Listing created"
    );

    Ok((StatusCode::CREATED, Json(ListingResponse::from(listing))))
}

/// GET /listings
pub async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<Vec<ListingResponse>>, AppError> {
    let filter = ListingFilter {
        available: query.available,
        location: query.location.filter(|l| !l.trim().is_empty()),
        listing_type: query.listing_type,
        min_guests: query.min_guests,
        limit: None,
    };

    let listings = state.store.list_listings(&filter).await?;
    Ok(Json(listings.into_iter().map(ListingResponse::from).collect()))
}

/// GET /listings/featured
pub async fn featured_listings(
    State(state): State<AppState>,
) -> Result<Json<Vec<ListingResponse>>, AppError> {
    let filter = ListingFilter {
        available: Some(true),
        limit: Some(FEATURED_LIMIT),
        ..Default::default()
    };

    let listings = state.store.list_listings(&filter).await?;
    Ok(Json(listings.into_iter().map(ListingResponse::from).collect()))
}

/// GET /listings/:slug
#[tracing::instrument(skip(state))]
pub async fn get_listing(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ListingResponse>, AppError> {
    let listing = state.store.get_listing_by_slug(&slug).await?;
    let amenities = state.store.amenities_for_listing(listing.id).await?;
    Ok(Json(ListingResponse::with_amenities(listing, amenities)))
}

/// PATCH /listings/:slug
#[tracing::instrument(skip(state, staff, req))]
pub async fn update_listing(
    State(state): State<AppState>,
    StaffUser(staff): StaffUser,
    Path(slug): Path<String>,
    Json(req): Json<UpdateListingRequest>,
) -> Result<Json<ListingResponse>, AppError> {
    req.validate()?;

    let mut listing = state.store.get_listing_by_slug(&slug).await?;

    if let Some(title) = req.title {
        listing.title = title;
    }
    if let Some(description) = req.description {
        listing.description = description;
    }
    if let Some(listing_type) = req.listing_type {
        listing.listing_type = listing_type;
    }
    if let Some(price) = req.price_per_night {
        listing.price_per_night = check_price(price)?;
    }
    if let Some(location) = req.location {
        listing.location = location;
    }
    if let Some(address) = req.address {
        listing.address = address;
    }
    if let Some(max_guests) = req.max_guests {
        listing.max_guests = max_guests;
    }
    if let Some(bedrooms) = req.bedrooms {
        listing.bedrooms = bedrooms;
    }
    if let Some(bathrooms) = req.bathrooms {
        listing.bathrooms = bathrooms;
    }
    if let Some(is_available) = req.is_available {
        listing.is_available = is_available;
    }
    listing.updated_at = Utc::now();

    let listing = state.store.update_listing(listing).await?;
    tracing::info!(listing_id = %listing.id, updated_by = %staff.user_id, "Listing updated");

    let amenities = state.store.amenities_for_listing(listing.id).await?;
    Ok(Json(ListingResponse::with_amenities(listing, amenities)))
}

/// POST /listings/:slug/amenities
#[tracing::instrument(skip(state, _staff, req), fields(amenity_id = %req.amenity_id))]
pub async fn attach_amenity(
    State(state): State<AppState>,
    StaffUser(_staff): StaffUser,
    Path(slug): Path<String>,
    Json(req): Json<AttachAmenityRequest>,
) -> Result<(StatusCode, Json<ListingResponse>), AppError> {
    let listing = state.store.get_listing_by_slug(&slug).await?;
    let amenity = state.store.get_amenity(req.amenity_id).await?;

    state.store.attach_amenity(listing.id, amenity.id).await?;
    tracing::info!(listing_id = %listing.id, amenity = %amenity.name, "Amenity attached");

    let amenities = state.store.amenities_for_listing(listing.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ListingResponse::with_amenities(listing, amenities)),
    ))
}
