use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::{
    BookDetails, BookId, BookRecord, ImageId, ListingDetail, ListingId, ListingPatch,
    ListingStatus, ListingSummary, NewReviewRequest, PurchaseRecord, ReservationId,
    ReservationRecord, ReviewId, ReviewRecord, TransactionId, UserId,
};
use crate::listing_lifecycle::{self, ListingAction, ListingState};
use crate::marketplace_repository::{
    now_unix_seconds, validate_new_listing, validate_new_user, validate_patch, validate_review,
    DeletedListing, ListingEditOutcome, MarketplaceError, MarketplaceRepository, NewListing,
    NewUser, UserCredentials,
};

struct UserRow {
    name: String,
    email: String,
    password_hash: String,
    #[allow(dead_code)]
    phone_number: Option<String>,
}

struct ListingRow {
    owner_id: UserId,
    book_id: BookId,
    price_cents: i64,
    condition: String,
    status: ListingStatus,
}

struct ReviewRow {
    user_id: UserId,
    listing_id: ListingId,
    rating: i32,
    comment: String,
    created_at: i64,
}

struct HoldRow {
    user_id: UserId,
    listing_id: ListingId,
    timestamp: i64,
}

struct ImageRow {
    file_path: String,
    listing_id: ListingId,
}

/// Listing fields that an edit may touch, merged with a json merge patch
#[derive(Serialize, Deserialize)]
struct EditableListing {
    title: String,
    author: String,
    isbn: String,
    year: Option<i32>,
    description: Option<String>,
    price_cents: i64,
    condition: String,
}

#[derive(Default)]
struct MarketplaceTables {
    users: BTreeMap<UserId, UserRow>,
    books: BTreeMap<BookId, BookDetails>,
    listings: BTreeMap<ListingId, ListingRow>,
    reviews: BTreeMap<ReviewId, ReviewRow>,
    favorites: BTreeSet<(UserId, ListingId)>,
    transactions: BTreeMap<TransactionId, HoldRow>,
    reservations: BTreeMap<ReservationId, HoldRow>,
    images: BTreeMap<ImageId, ImageRow>,
}

impl MarketplaceTables {
    fn listing_state(&self, listing_id: ListingId) -> Result<ListingState, MarketplaceError> {
        self.listings
            .get(&listing_id)
            .map(|row| ListingState {
                listing_id,
                owner_id: row.owner_id,
                status: row.status,
            })
            .ok_or(MarketplaceError::ListingNotFound(listing_id))
    }

    fn set_status(&mut self, listing_id: ListingId, status: ListingStatus) {
        if let Some(row) = self.listings.get_mut(&listing_id) {
            row.status = status;
        }
    }

    fn image_urls(&self, listing_id: ListingId) -> impl Iterator<Item = &String> {
        self.images
            .values()
            .filter(move |image| image.listing_id == listing_id)
            .map(|image| &image.file_path)
    }

    fn summary(&self, listing_id: ListingId) -> Result<ListingSummary, MarketplaceError> {
        let row = self
            .listings
            .get(&listing_id)
            .ok_or(MarketplaceError::ListingNotFound(listing_id))?;
        let book = self
            .books
            .get(&row.book_id)
            .ok_or_else(|| MarketplaceError::Other(format!("Book {} missing", row.book_id)))?;
        Ok(ListingSummary {
            listing_id,
            book_id: row.book_id,
            title: book.title.clone(),
            author: book.author.clone(),
            price_cents: row.price_cents,
            condition: row.condition.clone(),
            status: row.status,
            owner_id: row.owner_id,
            image_url: self.image_urls(listing_id).next().cloned(),
        })
    }

    fn summaries<'a>(
        &self,
        listing_ids: impl Iterator<Item = &'a ListingId>,
    ) -> Result<Vec<ListingSummary>, MarketplaceError> {
        listing_ids.map(|id| self.summary(*id)).collect()
    }

    fn isbn_taken_by_other(&self, isbn: &str, book_id: Option<BookId>) -> bool {
        self.books
            .iter()
            .any(|(id, book)| book.isbn == isbn && Some(*id) != book_id)
    }
}

pub struct InMemoryMarketplaceRepository {
    tables: parking_lot::RwLock<MarketplaceTables>,
    id_sequence_generator: AtomicI32,
}

impl Default for InMemoryMarketplaceRepository {
    fn default() -> Self {
        Self {
            tables: Default::default(),
            id_sequence_generator: AtomicI32::new(1),
        }
    }
}

impl InMemoryMarketplaceRepository {
    fn next_id(&self) -> i32 {
        self.id_sequence_generator.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl MarketplaceRepository for InMemoryMarketplaceRepository {
    async fn register_user(&self, user: NewUser) -> Result<UserId, MarketplaceError> {
        validate_new_user(&user)?;
        let mut tables = self.tables.write();

        let name_taken = tables.users.values().any(|row| row.name == user.name);
        let email_taken = tables.users.values().any(|row| row.email == user.email);
        if name_taken || email_taken {
            return Err(MarketplaceError::RegistrationConflict {
                name_taken,
                email_taken,
            });
        }

        let user_id = self.next_id();
        tables.users.insert(
            user_id,
            UserRow {
                name: user.name,
                email: user.email,
                password_hash: user.password_hash,
                phone_number: user.phone_number,
            },
        );
        Ok(user_id)
    }

    async fn get_credentials(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentials>, MarketplaceError> {
        Ok(self
            .tables
            .read()
            .users
            .iter()
            .find(|(_, row)| row.email == email)
            .map(|(&user_id, row)| UserCredentials {
                user_id,
                password_hash: row.password_hash.clone(),
            }))
    }

    async fn list_listings_by_status(
        &self,
        status: ListingStatus,
    ) -> Result<Vec<ListingSummary>, MarketplaceError> {
        let tables = self.tables.read();
        tables.summaries(
            tables
                .listings
                .iter()
                .filter(|(_, row)| row.status == status)
                .map(|(id, _)| id),
        )
    }

    async fn add_listing(
        &self,
        owner_id: UserId,
        listing: NewListing,
        image_url: Option<String>,
    ) -> Result<ListingId, MarketplaceError> {
        validate_new_listing(&listing)?;
        let mut tables = self.tables.write();

        if !tables.users.contains_key(&owner_id) {
            return Err(MarketplaceError::UserNotFound(owner_id));
        }

        let existing_book = tables
            .books
            .iter()
            .find(|(_, book)| {
                book.title == listing.book.title && book.author == listing.book.author
            })
            .map(|(&id, _)| id);

        let book_id = match existing_book {
            Some(book_id) => book_id,
            None => {
                if tables.isbn_taken_by_other(&listing.book.isbn, None) {
                    return Err(MarketplaceError::DuplicateIsbn(listing.book.isbn));
                }
                let book_id = self.next_id();
                tables.books.insert(book_id, listing.book);
                book_id
            }
        };

        let listing_id = self.next_id();
        tables.listings.insert(
            listing_id,
            ListingRow {
                owner_id,
                book_id,
                price_cents: listing.price_cents,
                condition: listing.condition,
                status: ListingStatus::Available,
            },
        );

        if let Some(file_path) = image_url {
            let image_id = self.next_id();
            tables.images.insert(
                image_id,
                ImageRow {
                    file_path,
                    listing_id,
                },
            );
        }
        Ok(listing_id)
    }

    async fn list_user_listings(
        &self,
        owner_id: UserId,
    ) -> Result<Vec<ListingSummary>, MarketplaceError> {
        let tables = self.tables.read();
        tables.summaries(
            tables
                .listings
                .iter()
                .filter(|(_, row)| row.owner_id == owner_id)
                .map(|(id, _)| id),
        )
    }

    async fn get_listing_detail(
        &self,
        listing_id: ListingId,
    ) -> Result<ListingDetail, MarketplaceError> {
        let tables = self.tables.read();
        let listing = tables.summary(listing_id)?;
        let book = BookRecord {
            book_id: listing.book_id,
            details: tables
                .books
                .get(&listing.book_id)
                .cloned()
                .ok_or_else(|| MarketplaceError::Other("Book missing".to_string()))?,
        };
        let seller_name = tables
            .users
            .get(&listing.owner_id)
            .map(|row| row.name.clone())
            .ok_or(MarketplaceError::UserNotFound(listing.owner_id))?;
        let reviews = tables
            .reviews
            .iter()
            .filter(|(_, review)| review.listing_id == listing_id)
            .map(|(&review_id, review)| ReviewRecord {
                review_id,
                user_id: review.user_id,
                reviewer_name: tables
                    .users
                    .get(&review.user_id)
                    .map(|row| row.name.clone())
                    .unwrap_or_default(),
                rating: review.rating,
                comment: review.comment.clone(),
                created_at: review.created_at,
            })
            .collect();

        Ok(ListingDetail {
            image_urls: tables.image_urls(listing_id).cloned().collect(),
            listing,
            book,
            seller_name,
            reviews,
        })
    }

    async fn edit_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
        patch: ListingPatch,
        new_image_url: Option<String>,
    ) -> Result<ListingEditOutcome, MarketplaceError> {
        validate_patch(&patch)?;
        let mut tables = self.tables.write();

        let state = tables.listing_state(listing_id)?;
        listing_lifecycle::authorize(ListingAction::Edit, actor, &state)?;

        let (book_id, price_cents, condition) = {
            let row = &tables.listings[&listing_id];
            (row.book_id, row.price_cents, row.condition.clone())
        };
        let book = tables
            .books
            .get(&book_id)
            .cloned()
            .ok_or_else(|| MarketplaceError::Other(format!("Book {} missing", book_id)))?;

        let mut editable = json!(EditableListing {
            title: book.title,
            author: book.author,
            isbn: book.isbn,
            year: book.year,
            description: book.description,
            price_cents,
            condition,
        });
        json_patch::merge(&mut editable, &json!(patch));
        let edited: EditableListing = serde_json::from_value(editable)
            .map_err(|err| MarketplaceError::Other(err.to_string()))?;

        if tables.isbn_taken_by_other(&edited.isbn, Some(book_id)) {
            return Err(MarketplaceError::DuplicateIsbn(edited.isbn));
        }

        tables.books.insert(
            book_id,
            BookDetails {
                title: edited.title,
                author: edited.author,
                isbn: edited.isbn,
                year: edited.year,
                description: edited.description,
            },
        );
        if let Some(row) = tables.listings.get_mut(&listing_id) {
            row.price_cents = edited.price_cents;
            row.condition = edited.condition;
        }

        let mut outcome = ListingEditOutcome::default();
        if let Some(new_url) = new_image_url {
            let first_image_id = tables
                .images
                .iter()
                .find(|(_, image)| image.listing_id == listing_id)
                .map(|(&image_id, _)| image_id);
            match first_image_id {
                Some(image_id) => {
                    if let Some(image) = tables.images.get_mut(&image_id) {
                        outcome.replaced_image_url =
                            Some(std::mem::replace(&mut image.file_path, new_url));
                    }
                }
                None => {
                    let image_id = self.next_id();
                    tables.images.insert(
                        image_id,
                        ImageRow {
                            file_path: new_url,
                            listing_id,
                        },
                    );
                }
            }
        }
        Ok(outcome)
    }

    async fn delete_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<DeletedListing, MarketplaceError> {
        let mut tables = self.tables.write();

        let state = tables.listing_state(listing_id)?;
        listing_lifecycle::authorize(ListingAction::Delete, actor, &state)?;
        let title = tables.summary(listing_id)?.title;

        tables
            .favorites
            .retain(|(_, favorite_listing)| *favorite_listing != listing_id);
        tables
            .reviews
            .retain(|_, review| review.listing_id != listing_id);
        let image_urls = tables.image_urls(listing_id).cloned().collect();
        tables
            .images
            .retain(|_, image| image.listing_id != listing_id);
        tables.listings.remove(&listing_id);

        Ok(DeletedListing { title, image_urls })
    }

    async fn add_favorite(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<(), MarketplaceError> {
        let mut tables = self.tables.write();

        let state = tables.listing_state(listing_id)?;
        listing_lifecycle::authorize(ListingAction::Favorite, actor, &state)?;

        if tables.favorites.insert((actor, listing_id)) {
            Ok(())
        } else {
            Err(MarketplaceError::AlreadyFavorited(listing_id))
        }
    }

    async fn remove_favorite(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<(), MarketplaceError> {
        if self.tables.write().favorites.remove(&(actor, listing_id)) {
            Ok(())
        } else {
            Err(MarketplaceError::NotInFavorites(listing_id))
        }
    }

    async fn list_favorites(&self, actor: UserId) -> Result<Vec<ListingSummary>, MarketplaceError> {
        let tables = self.tables.read();
        tables.summaries(
            tables
                .favorites
                .iter()
                .filter(|(user_id, _)| *user_id == actor)
                .map(|(_, listing_id)| listing_id),
        )
    }

    async fn add_review(
        &self,
        actor: UserId,
        listing_id: ListingId,
        review: NewReviewRequest,
    ) -> Result<ReviewId, MarketplaceError> {
        validate_review(&review)?;
        let mut tables = self.tables.write();

        tables.listing_state(listing_id)?;
        let already_reviewed = tables
            .reviews
            .values()
            .any(|row| row.user_id == actor && row.listing_id == listing_id);
        if already_reviewed {
            return Err(MarketplaceError::AlreadyReviewed(listing_id));
        }

        let review_id = self.next_id();
        tables.reviews.insert(
            review_id,
            ReviewRow {
                user_id: actor,
                listing_id,
                rating: review.rating,
                comment: review.comment,
                created_at: now_unix_seconds(),
            },
        );
        Ok(review_id)
    }

    async fn search_listings(&self, query: &str) -> Result<Vec<ListingSummary>, MarketplaceError> {
        let needle = query.to_lowercase();
        let tables = self.tables.read();
        tables.summaries(
            tables
                .listings
                .iter()
                .filter(|(_, row)| {
                    tables.books.get(&row.book_id).is_some_and(|book| {
                        book.title.to_lowercase().contains(&needle)
                            || book.author.to_lowercase().contains(&needle)
                    })
                })
                .map(|(id, _)| id),
        )
    }

    async fn buy_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<TransactionId, MarketplaceError> {
        let mut tables = self.tables.write();

        let state = tables.listing_state(listing_id)?;
        listing_lifecycle::authorize(ListingAction::Buy, actor, &state)?;

        let transaction_id = self.next_id();
        tables.transactions.insert(
            transaction_id,
            HoldRow {
                user_id: actor,
                listing_id,
                timestamp: now_unix_seconds(),
            },
        );
        tables.set_status(
            listing_id,
            listing_lifecycle::next_status(ListingAction::Buy, state.status),
        );
        Ok(transaction_id)
    }

    async fn list_purchases(&self, actor: UserId) -> Result<Vec<PurchaseRecord>, MarketplaceError> {
        let tables = self.tables.read();
        tables
            .transactions
            .iter()
            .filter(|(_, row)| row.user_id == actor)
            .map(|(&transaction_id, row)| {
                Ok(PurchaseRecord {
                    transaction_id,
                    purchased_at: row.timestamp,
                    listing: tables.summary(row.listing_id)?,
                })
            })
            .collect()
    }

    async fn reserve_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<ReservationId, MarketplaceError> {
        let mut tables = self.tables.write();

        let state = tables.listing_state(listing_id)?;
        listing_lifecycle::authorize(ListingAction::Reserve, actor, &state)?;

        let reservation_id = self.next_id();
        tables.reservations.insert(
            reservation_id,
            HoldRow {
                user_id: actor,
                listing_id,
                timestamp: now_unix_seconds(),
            },
        );
        tables.set_status(
            listing_id,
            listing_lifecycle::next_status(ListingAction::Reserve, state.status),
        );
        Ok(reservation_id)
    }

    async fn delete_reservation(
        &self,
        actor: UserId,
        reservation_id: ReservationId,
    ) -> Result<(), MarketplaceError> {
        let mut tables = self.tables.write();

        let reservation = tables
            .reservations
            .get(&reservation_id)
            .ok_or(MarketplaceError::ReservationNotFound(reservation_id))?;
        if reservation.user_id != actor {
            return Err(MarketplaceError::NotReservationHolder(reservation_id));
        }
        let listing_id = reservation.listing_id;

        let state = tables.listing_state(listing_id)?;
        listing_lifecycle::authorize(ListingAction::CancelReservation, actor, &state)?;
        tables.set_status(
            listing_id,
            listing_lifecycle::next_status(ListingAction::CancelReservation, state.status),
        );
        tables.reservations.remove(&reservation_id);
        Ok(())
    }

    async fn list_reservations(
        &self,
        actor: UserId,
    ) -> Result<Vec<ReservationRecord>, MarketplaceError> {
        let tables = self.tables.read();
        tables
            .reservations
            .iter()
            .filter(|(_, row)| row.user_id == actor)
            .map(|(&reservation_id, row)| {
                Ok(ReservationRecord {
                    reservation_id,
                    reserved_at: row.timestamp,
                    listing: tables.summary(row.listing_id)?,
                })
            })
            .collect()
    }

    async fn buy_reserved_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
        reservation_id: ReservationId,
    ) -> Result<TransactionId, MarketplaceError> {
        let mut tables = self.tables.write();

        let state = tables.listing_state(listing_id)?;
        let reservation = tables
            .reservations
            .get(&reservation_id)
            .ok_or(MarketplaceError::ReservationNotFound(reservation_id))?;
        if reservation.user_id != actor {
            return Err(MarketplaceError::NotReservationHolder(reservation_id));
        }
        if reservation.listing_id != listing_id {
            return Err(MarketplaceError::ReservationListingMismatch {
                reservation_id,
                listing_id,
            });
        }
        listing_lifecycle::authorize(ListingAction::BuyReserved, actor, &state)?;

        let transaction_id = self.next_id();
        tables.transactions.insert(
            transaction_id,
            HoldRow {
                user_id: actor,
                listing_id,
                timestamp: now_unix_seconds(),
            },
        );
        tables.reservations.remove(&reservation_id);
        tables.set_status(
            listing_id,
            listing_lifecycle::next_status(ListingAction::BuyReserved, state.status),
        );
        Ok(transaction_id)
    }
}
