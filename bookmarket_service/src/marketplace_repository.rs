pub use in_memory_marketplace_repository::InMemoryMarketplaceRepository;
pub use postgres_marketplace_repository::{
    PostgresMarketplaceRepository, PostgresMarketplaceRepositoryConfig,
};

use crate::api::{
    BookDetails, ListingDetail, ListingId, ListingPatch, ListingStatus, ListingSummary,
    NewReviewRequest, PurchaseRecord, ReservationId, ReservationRecord, ReviewId, TransactionId,
    UserId,
};
use crate::listing_lifecycle::LifecycleViolation;

mod in_memory_marketplace_repository;
mod postgres_marketplace_repository;

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Listing {0} not found")]
    ListingNotFound(ListingId),

    #[error("Reservation {0} not found")]
    ReservationNotFound(ReservationId),

    #[error("Registration rejected (name taken: {name_taken}, email taken: {email_taken})")]
    RegistrationConflict { name_taken: bool, email_taken: bool },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleViolation),

    #[error("Reservation {0} belongs to a different user")]
    NotReservationHolder(ReservationId),

    #[error("Reservation {reservation_id} is not for listing {listing_id}")]
    ReservationListingMismatch {
        reservation_id: ReservationId,
        listing_id: ListingId,
    },

    #[error("Listing {0} already in favorites")]
    AlreadyFavorited(ListingId),

    #[error("Listing {0} not in favorites")]
    NotInFavorites(ListingId),

    #[error("Listing {0} already reviewed by this user")]
    AlreadyReviewed(ListingId),

    #[error("Book with isbn {0} already registered under a different title or author")]
    DuplicateIsbn(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    /// PHC string produced by [`crate::sessions::hash_password`]
    pub password_hash: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UserCredentials {
    pub user_id: UserId,
    pub password_hash: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewListing {
    pub book: BookDetails,
    pub price_cents: i64,
    pub condition: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ListingEditOutcome {
    /// Url of the image that got replaced, to be removed from storage
    pub replaced_image_url: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeletedListing {
    pub title: String,
    pub image_urls: Vec<String>,
}

#[async_trait::async_trait]
pub trait MarketplaceRepository: Send + Sync {
    /// Adds user, rejects duplicated name or email (reporting both at once)
    async fn register_user(&self, user: NewUser) -> Result<UserId, MarketplaceError>;

    /// Looks up login data by email, None if nobody registered with it
    async fn get_credentials(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentials>, MarketplaceError>;

    async fn list_listings_by_status(
        &self,
        status: ListingStatus,
    ) -> Result<Vec<ListingSummary>, MarketplaceError>;

    /// Creates an Available listing, reusing the book with the same title and author if present
    async fn add_listing(
        &self,
        owner_id: UserId,
        listing: NewListing,
        image_url: Option<String>,
    ) -> Result<ListingId, MarketplaceError>;

    async fn list_user_listings(
        &self,
        owner_id: UserId,
    ) -> Result<Vec<ListingSummary>, MarketplaceError>;

    async fn get_listing_detail(
        &self,
        listing_id: ListingId,
    ) -> Result<ListingDetail, MarketplaceError>;

    /// Applies patch to the listing and its book, replacing the first image when a new url is given
    async fn edit_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
        patch: ListingPatch,
        new_image_url: Option<String>,
    ) -> Result<ListingEditOutcome, MarketplaceError>;

    /// Deletes listing with its favorites, reviews and images
    async fn delete_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<DeletedListing, MarketplaceError>;

    async fn add_favorite(&self, actor: UserId, listing_id: ListingId)
        -> Result<(), MarketplaceError>;

    async fn remove_favorite(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<(), MarketplaceError>;

    async fn list_favorites(&self, actor: UserId) -> Result<Vec<ListingSummary>, MarketplaceError>;

    async fn add_review(
        &self,
        actor: UserId,
        listing_id: ListingId,
        review: NewReviewRequest,
    ) -> Result<ReviewId, MarketplaceError>;

    /// Case insensitive substring match on book title or author
    async fn search_listings(&self, query: &str) -> Result<Vec<ListingSummary>, MarketplaceError>;

    /// Direct purchase of an Available listing
    async fn buy_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<TransactionId, MarketplaceError>;

    async fn list_purchases(&self, actor: UserId) -> Result<Vec<PurchaseRecord>, MarketplaceError>;

    async fn reserve_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<ReservationId, MarketplaceError>;

    /// Drops reservation and puts the listing back to Available
    async fn delete_reservation(
        &self,
        actor: UserId,
        reservation_id: ReservationId,
    ) -> Result<(), MarketplaceError>;

    async fn list_reservations(
        &self,
        actor: UserId,
    ) -> Result<Vec<ReservationRecord>, MarketplaceError>;

    /// Turns the reservation into a transaction and marks the listing Sold
    async fn buy_reserved_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
        reservation_id: ReservationId,
    ) -> Result<TransactionId, MarketplaceError>;
}

fn require_not_blank(field: &str, value: &str) -> Result<(), MarketplaceError> {
    if value.trim().is_empty() {
        Err(MarketplaceError::InvalidInput(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

fn require_valid_price(price_cents: i64) -> Result<(), MarketplaceError> {
    if price_cents < 0 {
        Err(MarketplaceError::InvalidInput(
            "price must not be negative".to_string(),
        ))
    } else {
        Ok(())
    }
}

pub(crate) fn validate_new_user(user: &NewUser) -> Result<(), MarketplaceError> {
    require_not_blank("name", &user.name)?;
    require_not_blank("email", &user.email)?;
    require_not_blank("password", &user.password_hash)
}

pub(crate) fn validate_new_listing(listing: &NewListing) -> Result<(), MarketplaceError> {
    require_not_blank("title", &listing.book.title)?;
    require_not_blank("author", &listing.book.author)?;
    require_not_blank("isbn", &listing.book.isbn)?;
    require_not_blank("condition", &listing.condition)?;
    require_valid_price(listing.price_cents)
}

pub(crate) fn validate_patch(patch: &ListingPatch) -> Result<(), MarketplaceError> {
    let text_fields = [
        ("title", &patch.title),
        ("author", &patch.author),
        ("isbn", &patch.isbn),
        ("condition", &patch.condition),
    ];
    for (field, value) in text_fields {
        if let Some(value) = value {
            require_not_blank(field, value)?;
        }
    }
    if let Some(price_cents) = patch.price_cents {
        require_valid_price(price_cents)?;
    }
    Ok(())
}

pub(crate) fn validate_review(review: &NewReviewRequest) -> Result<(), MarketplaceError> {
    if !(MIN_RATING..=MAX_RATING).contains(&review.rating) {
        return Err(MarketplaceError::InvalidInput(format!(
            "rating must be between {} and {}",
            MIN_RATING, MAX_RATING
        )));
    }
    require_not_blank("comment", &review.comment)
}

pub(crate) fn now_unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
