//! Maps failures to the flash body and status code returned to the user.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;

use crate::api::{Flash, FlashCategory};
use crate::image_upload::ImageUploadError;
use crate::listing_lifecycle::{LifecycleViolation, ListingAction};
use crate::marketplace_repository::MarketplaceError;

pub fn success(message: impl Into<String>, redirect_to: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(Flash::new(FlashCategory::Success, message, redirect_to))
}

fn lifecycle_flash(violation: &LifecycleViolation) -> (StatusCode, FlashCategory, String) {
    match violation {
        LifecycleViolation::NotOwner(_) => (
            StatusCode::FORBIDDEN,
            FlashCategory::Danger,
            "You do not have permission to change this listing.".to_string(),
        ),
        LifecycleViolation::OwnListing { action, .. } => {
            let message = match action {
                ListingAction::Favorite => "You cannot add your own listing to your favorites.",
                ListingAction::Reserve => "You cannot reserve your own listing.",
                _ => "You cannot purchase your own listing.",
            };
            (StatusCode::FORBIDDEN, FlashCategory::Danger, message.to_string())
        }
        LifecycleViolation::Sold(_) => (
            StatusCode::CONFLICT,
            FlashCategory::Danger,
            "You cannot add a sold listing to your favorites.".to_string(),
        ),
        LifecycleViolation::NotAvailable { .. } => (
            StatusCode::CONFLICT,
            FlashCategory::Danger,
            "This listing is not available.".to_string(),
        ),
        LifecycleViolation::Locked { status, .. } => (
            StatusCode::CONFLICT,
            FlashCategory::Warning,
            format!(
                "The listing cannot be deleted because it is {}.",
                status.as_str().to_lowercase()
            ),
        ),
        LifecycleViolation::NotReserved(_) => (
            StatusCode::CONFLICT,
            FlashCategory::Danger,
            "This listing is no longer reserved and cannot be purchased.".to_string(),
        ),
    }
}

fn marketplace_flash(err: &MarketplaceError) -> (StatusCode, FlashCategory, String) {
    let (status, category, message) = match err {
        MarketplaceError::Lifecycle(violation) => return lifecycle_flash(violation),
        MarketplaceError::UserNotFound(_) => (
            StatusCode::NOT_FOUND,
            FlashCategory::Danger,
            "User not found.",
        ),
        MarketplaceError::ListingNotFound(_) => (
            StatusCode::NOT_FOUND,
            FlashCategory::Danger,
            "Listing not found.",
        ),
        MarketplaceError::ReservationNotFound(_) => (
            StatusCode::NOT_FOUND,
            FlashCategory::Danger,
            "Reservation not found.",
        ),
        MarketplaceError::NotInFavorites(_) => (
            StatusCode::NOT_FOUND,
            FlashCategory::Warning,
            "Listing was not found in your favorites.",
        ),
        MarketplaceError::RegistrationConflict { .. } => (
            StatusCode::CONFLICT,
            FlashCategory::Danger,
            "Name or email is already taken.",
        ),
        MarketplaceError::NotReservationHolder(_) => (
            StatusCode::FORBIDDEN,
            FlashCategory::Danger,
            "You do not have permission to use this reservation.",
        ),
        MarketplaceError::ReservationListingMismatch { .. } => (
            StatusCode::BAD_REQUEST,
            FlashCategory::Danger,
            "This reservation is for a different listing.",
        ),
        MarketplaceError::AlreadyFavorited(_) => (
            StatusCode::CONFLICT,
            FlashCategory::Warning,
            "Listing is already in favorites!",
        ),
        MarketplaceError::AlreadyReviewed(_) => (
            StatusCode::CONFLICT,
            FlashCategory::Danger,
            "You have already posted a review for this listing.",
        ),
        MarketplaceError::DuplicateIsbn(_) => (
            StatusCode::CONFLICT,
            FlashCategory::Danger,
            "A different book with this ISBN already exists.",
        ),
        MarketplaceError::InvalidInput(reason) => {
            return (
                StatusCode::BAD_REQUEST,
                FlashCategory::Warning,
                format!("Invalid input: {}.", reason),
            )
        }
        MarketplaceError::DatabaseFailure(_) | MarketplaceError::Other(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            FlashCategory::Danger,
            "An error occurred while processing your request.",
        ),
    };
    (status, category, message.to_string())
}

/// Flash response for a failed repository call, with `redirect_to` as the next page
pub fn error_response(err: &MarketplaceError, redirect_to: &str) -> HttpResponse {
    let (status, category, message) = marketplace_flash(err);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::info!("Request rejected: {}", err);
    }
    HttpResponse::build(status).json(Flash::new(category, message, redirect_to))
}

pub fn upload_rejected(err: &ImageUploadError, redirect_to: &str) -> HttpResponse {
    tracing::info!("Image rejected: {}", err);
    HttpResponse::BadRequest().json(Flash::new(
        FlashCategory::Danger,
        format!("{}.", err),
        redirect_to,
    ))
}

pub fn upload_failed(err: &anyhow::Error, redirect_to: &str) -> HttpResponse {
    tracing::error!("Image upload failed: {:#}", err);
    HttpResponse::BadGateway().json(Flash::new(
        FlashCategory::Danger,
        "There was a problem uploading the image.",
        redirect_to,
    ))
}
