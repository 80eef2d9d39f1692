mod bookings;
mod listings;
mod reviews;

pub use bookings::{
    BookingResponse, CreateBookingRequest, PaymentInProgressResponse, PaymentResponse, VerifyQuery,
    WebhookPayload,
};
pub use listings::{
    AmenityResponse, AttachAmenityRequest, CreateAmenityRequest, CreateListingRequest,
    ListingQuery, ListingResponse, UpdateListingRequest,
};
pub use reviews::{CreateReviewRequest, ReviewQuery, ReviewResponse, UpdateReviewRequest};
