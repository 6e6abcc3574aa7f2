use std::fmt;
use std::str::FromStr;

use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub type UserId = i32;
pub type BookId = i32;
pub type ListingId = i32;
pub type ReviewId = i32;
pub type ReservationId = i32;
pub type TransactionId = i32;
pub type ImageId = i32;

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "bookmarket_session";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Apiv2Schema)]
/// Lifecycle state of a listing
pub enum ListingStatus {
    Available,
    Reserved,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Available => "Available",
            ListingStatus::Reserved => "Reserved",
            ListingStatus::Sold => "Sold",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Available" => Ok(ListingStatus::Available),
            "Reserved" => Ok(ListingStatus::Reserved),
            "Sold" => Ok(ListingStatus::Sold),
            other => Err(format!("Unknown listing status {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Success,
    Info,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// One-shot message for the user together with the page the front end should go to next
pub struct Flash {
    pub category: FlashCategory,
    pub message: String,
    pub redirect_to: String,
}

impl Flash {
    pub fn new(
        category: FlashCategory,
        message: impl Into<String>,
        redirect_to: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            redirect_to: redirect_to.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Returned with 409 when registration is rejected, both fields may be set at once
pub struct RegistrationErrors {
    pub name_error: Option<String>,
    pub email_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Bibliographic data of a book. Books are shared between listings with the same title and author
pub struct BookDetails {
    pub title: String,
    pub author: String,
    pub isbn: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct BookRecord {
    pub book_id: BookId,
    pub details: BookDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Image sent inline with a listing form
pub struct ImageUpload {
    pub filename: String,
    pub content_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct NewListingRequest {
    pub book: BookDetails,
    pub price_cents: i64,
    pub condition: String,
    #[serde(default)]
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Patch to a listing and its book. Only the fields that are set get changed
pub struct ListingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl ListingPatch {
    pub fn touches_book(&self) -> bool {
        self.title.is_some()
            || self.author.is_some()
            || self.isbn.is_some()
            || self.year.is_some()
            || self.description.is_some()
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct EditListingRequest {
    #[serde(default)]
    pub changes: ListingPatch,
    #[serde(default)]
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Listing as shown in overviews, with the book title and author and the first image
pub struct ListingSummary {
    pub listing_id: ListingId,
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    pub price_cents: i64,
    pub condition: String,
    pub status: ListingStatus,
    pub owner_id: UserId,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReviewRecord {
    pub review_id: ReviewId,
    pub user_id: UserId,
    pub reviewer_name: String,
    pub rating: i32,
    pub comment: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ListingDetail {
    pub listing: ListingSummary,
    pub book: BookRecord,
    pub seller_name: String,
    pub image_urls: Vec<String>,
    pub reviews: Vec<ReviewRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct NewReviewRequest {
    pub rating: i32,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Front page. Reserved listings are only shown to logged in users
pub struct IndexPage {
    pub available_listings: Vec<ListingSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_listings: Option<Vec<ListingSummary>>,
    pub sold_listings: Vec<ListingSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<ListingSummary>,
    /// Set when nothing matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<Flash>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct PurchaseRecord {
    pub transaction_id: TransactionId,
    pub purchased_at: i64,
    pub listing: ListingSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReservationRecord {
    pub reservation_id: ReservationId,
    pub reserved_at: i64,
    pub listing: ListingSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReservedListingPath {
    pub listing_id: ListingId,
    pub reservation_id: ReservationId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ListingsResponse {
    pub listings: Vec<ListingSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct PurchasesResponse {
    pub purchases: Vec<PurchaseRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReservationsResponse {
    pub reservations: Vec<ReservationRecord>,
}

#[cfg(test)]
mod api_tests {
    use super::*;

    #[test]
    fn test_listing_status_parses_its_own_name() {
        for status in [
            ListingStatus::Available,
            ListingStatus::Reserved,
            ListingStatus::Sold,
        ] {
            assert_eq!(status.as_str().parse::<ListingStatus>(), Ok(status));
        }
        assert!("sold".parse::<ListingStatus>().is_err());
    }

    #[test]
    fn test_index_page_hides_reserved_listings_when_not_set() {
        let page = IndexPage {
            available_listings: vec![],
            reserved_listings: None,
            sold_listings: vec![],
        };
        let json = serde_json::to_value(&page).unwrap();
        assert!(json.get("reserved_listings").is_none());
    }
}
