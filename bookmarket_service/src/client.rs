use anyhow::{bail, Context};
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;
use serde::de::DeserializeOwned;

use crate::api::{
    EditListingRequest, Flash, IndexPage, ListingDetail, ListingId, ListingSummary,
    ListingsResponse, LoginRequest, NewListingRequest, NewReviewRequest, PurchaseRecord,
    PurchasesResponse, RegisterRequest, RegistrationErrors, ReservationId, ReservationRecord,
    ReservationsResponse, SearchResults,
};

/// Result of an action route, successful or rejected with a flash
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub status: StatusCode,
    pub flash: Flash,
    /// Id from the last segment of the LOCATION header, when the server sent one
    pub created_id: Option<i32>,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RegistrationOutcome {
    Registered,
    Rejected(RegistrationErrors),
}

/// Client for the marketplace http api.
/// Keeps the session cookie between calls, so one client is one logged in user
pub struct BookMarketClient {
    url: String,
    client: ClientWithMiddleware,
}

impl BookMarketClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn action(&self, request: RequestBuilder) -> anyhow::Result<ActionOutcome> {
        let response = request.send().await?;
        let status = response.status();
        let created_id = response
            .headers()
            .get(LOCATION)
            .and_then(|location| location.to_str().ok())
            .and_then(|location| location.rsplit('/').next())
            .and_then(|id| id.parse().ok());
        if status.is_server_error() {
            let error = response.text().await.unwrap_or_default();
            bail!("Server failed with {}: {}", status, error)
        }
        let flash = response
            .json()
            .await
            .with_context(|| format!("Response with status {} carries no flash", status))?;
        Ok(ActionOutcome {
            status,
            flash,
            created_id,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<T> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            bail!("Request failed with {}: {}", status, error)
        }
    }

    /// Calls POST /register
    pub async fn register(&self, request: &RegisterRequest) -> anyhow::Result<RegistrationOutcome> {
        let response = self
            .client
            .post(format!("{}/register", self.url))
            .json(request)
            .send()
            .await?;
        match response.status() {
            StatusCode::CONFLICT => Ok(RegistrationOutcome::Rejected(response.json().await?)),
            status if status.is_success() => Ok(RegistrationOutcome::Registered),
            status => {
                let error = response.text().await.unwrap_or_default();
                bail!("Failed to register {}: {}", status, error)
            }
        }
    }

    /// Calls POST /login, true if the credentials were accepted
    pub async fn login(&self, email: &str, password: &str) -> anyhow::Result<bool> {
        let outcome = self
            .action(
                self.client
                    .post(format!("{}/login", self.url))
                    .json(&LoginRequest {
                        email: email.to_string(),
                        password: password.to_string(),
                    }),
            )
            .await?;
        Ok(outcome.is_success())
    }

    /// Calls GET /logout
    pub async fn logout(&self) -> anyhow::Result<ActionOutcome> {
        self.action(self.client.get(format!("{}/logout", self.url)))
            .await
    }

    /// Calls GET /
    pub async fn index(&self) -> anyhow::Result<IndexPage> {
        self.fetch(self.client.get(format!("{}/", self.url))).await
    }

    /// Calls POST /add_listing
    /// Returns id of the new listing
    pub async fn add_listing(&self, request: &NewListingRequest) -> anyhow::Result<ListingId> {
        let outcome = self
            .action(
                self.client
                    .post(format!("{}/add_listing", self.url))
                    .json(request),
            )
            .await?;
        if !outcome.is_success() {
            bail!("Failed to add listing: {}", outcome.flash.message)
        }
        outcome.created_id.context("No listing id in location header")
    }

    /// Calls GET /my_listings
    pub async fn my_listings(&self) -> anyhow::Result<Vec<ListingSummary>> {
        let response: ListingsResponse = self
            .fetch(self.client.get(format!("{}/my_listings", self.url)))
            .await?;
        Ok(response.listings)
    }

    /// Calls GET /edit_listings/{listing_id}
    pub async fn listing_for_edit(&self, listing_id: ListingId) -> anyhow::Result<ListingDetail> {
        self.fetch(
            self.client
                .get(format!("{}/edit_listings/{}", self.url, listing_id)),
        )
        .await
    }

    /// Calls POST /edit_listings/{listing_id}
    pub async fn edit_listing(
        &self,
        listing_id: ListingId,
        request: &EditListingRequest,
    ) -> anyhow::Result<ActionOutcome> {
        self.action(
            self.client
                .post(format!("{}/edit_listings/{}", self.url, listing_id))
                .json(request),
        )
        .await
    }

    /// Calls POST /delete_listing/{listing_id}
    pub async fn delete_listing(&self, listing_id: ListingId) -> anyhow::Result<ActionOutcome> {
        self.action(
            self.client
                .post(format!("{}/delete_listing/{}", self.url, listing_id)),
        )
        .await
    }

    /// Calls POST /add_to_favorites/{listing_id}
    pub async fn add_to_favorites(&self, listing_id: ListingId) -> anyhow::Result<ActionOutcome> {
        self.action(
            self.client
                .post(format!("{}/add_to_favorites/{}", self.url, listing_id)),
        )
        .await
    }

    /// Calls POST /remove_from_favorites/{listing_id}
    pub async fn remove_from_favorites(
        &self,
        listing_id: ListingId,
    ) -> anyhow::Result<ActionOutcome> {
        self.action(
            self.client
                .post(format!("{}/remove_from_favorites/{}", self.url, listing_id)),
        )
        .await
    }

    /// Calls GET /my_favorites
    pub async fn my_favorites(&self) -> anyhow::Result<Vec<ListingSummary>> {
        let response: ListingsResponse = self
            .fetch(self.client.get(format!("{}/my_favorites", self.url)))
            .await?;
        Ok(response.listings)
    }

    /// Calls POST /add_review/{listing_id}
    pub async fn add_review(
        &self,
        listing_id: ListingId,
        review: &NewReviewRequest,
    ) -> anyhow::Result<ActionOutcome> {
        self.action(
            self.client
                .post(format!("{}/add_review/{}", self.url, listing_id))
                .json(review),
        )
        .await
    }

    /// Calls GET /listing_detail/{listing_id}
    /// None if there is no such listing
    pub async fn listing_detail(
        &self,
        listing_id: ListingId,
    ) -> anyhow::Result<Option<ListingDetail>> {
        let response = self
            .client
            .get(format!("{}/listing_detail/{}", self.url, listing_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            let error = response.text().await.unwrap_or_default();
            bail!("Failed to get listing {}", error)
        }
    }

    /// Calls GET /search?q={query}
    pub async fn search(&self, query: &str) -> anyhow::Result<SearchResults> {
        self.fetch(
            self.client
                .get(format!("{}/search", self.url))
                .query(&[("q", query)]),
        )
        .await
    }

    /// Calls POST /buy_listing/{listing_id}
    pub async fn buy_listing(&self, listing_id: ListingId) -> anyhow::Result<ActionOutcome> {
        self.action(
            self.client
                .post(format!("{}/buy_listing/{}", self.url, listing_id)),
        )
        .await
    }

    /// Calls GET /my_purchases
    pub async fn my_purchases(&self) -> anyhow::Result<Vec<PurchaseRecord>> {
        let response: PurchasesResponse = self
            .fetch(self.client.get(format!("{}/my_purchases", self.url)))
            .await?;
        Ok(response.purchases)
    }

    /// Calls POST /reserve_listing/{listing_id}
    /// On success `created_id` holds the reservation id
    pub async fn reserve_listing(&self, listing_id: ListingId) -> anyhow::Result<ActionOutcome> {
        self.action(
            self.client
                .post(format!("{}/reserve_listing/{}", self.url, listing_id)),
        )
        .await
    }

    /// Calls POST /delete_reservation/{reservation_id}
    pub async fn delete_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> anyhow::Result<ActionOutcome> {
        self.action(
            self.client
                .post(format!("{}/delete_reservation/{}", self.url, reservation_id)),
        )
        .await
    }

    /// Calls GET /my_reservations
    pub async fn my_reservations(&self) -> anyhow::Result<Vec<ReservationRecord>> {
        let response: ReservationsResponse = self
            .fetch(self.client.get(format!("{}/my_reservations", self.url)))
            .await?;
        Ok(response.reservations)
    }

    /// Calls POST /buy_reserved_listing/{listing_id}/{reservation_id}
    pub async fn buy_reserved_listing(
        &self,
        listing_id: ListingId,
        reservation_id: ReservationId,
    ) -> anyhow::Result<ActionOutcome> {
        self.action(self.client.post(format!(
            "{}/buy_reserved_listing/{}/{}",
            self.url, listing_id, reservation_id
        )))
        .await
    }
}
