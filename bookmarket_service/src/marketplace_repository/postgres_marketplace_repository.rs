use anyhow::Context;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row, Transaction};

use crate::api::{
    BookDetails, BookRecord, ListingDetail, ListingId, ListingPatch, ListingStatus,
    ListingSummary, NewReviewRequest, PurchaseRecord, ReservationId, ReservationRecord, ReviewId,
    ReviewRecord, TransactionId, UserId,
};
use crate::listing_lifecycle::{self, ListingAction, ListingState};
use crate::marketplace_repository::{
    now_unix_seconds, validate_new_listing, validate_new_user, validate_patch, validate_review,
    DeletedListing, ListingEditOutcome, MarketplaceError, MarketplaceRepository, NewListing,
    NewUser, UserCredentials,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id              SERIAL PRIMARY KEY,
        name            VARCHAR(150) NOT NULL UNIQUE,
        email           VARCHAR(150) NOT NULL UNIQUE,
        password        TEXT NOT NULL,
        phone_number    VARCHAR(20)
    );
    CREATE TABLE IF NOT EXISTS books (
        id              SERIAL PRIMARY KEY,
        isbn            TEXT NOT NULL UNIQUE,
        author          VARCHAR(150) NOT NULL,
        title           VARCHAR(200) NOT NULL,
        description     TEXT,
        year            INTEGER
    );
    CREATE TABLE IF NOT EXISTS listings (
        id              SERIAL PRIMARY KEY,
        price_cents     BIGINT NOT NULL,
        condition       VARCHAR(50) NOT NULL,
        status          VARCHAR(50) NOT NULL DEFAULT 'Available',
        user_id         INTEGER NOT NULL REFERENCES users (id),
        book_id         INTEGER NOT NULL REFERENCES books (id)
    );
    CREATE TABLE IF NOT EXISTS reviews (
        id              SERIAL PRIMARY KEY,
        comment         TEXT NOT NULL,
        rating          INTEGER NOT NULL,
        created_at      BIGINT NOT NULL,
        user_id         INTEGER NOT NULL REFERENCES users (id),
        listing_id      INTEGER NOT NULL REFERENCES listings (id),
        UNIQUE (user_id, listing_id)
    );
    CREATE TABLE IF NOT EXISTS favorites (
        user_id         INTEGER NOT NULL REFERENCES users (id),
        listing_id      INTEGER NOT NULL REFERENCES listings (id),
        PRIMARY KEY (user_id, listing_id)
    );
    CREATE TABLE IF NOT EXISTS transactions (
        id              SERIAL PRIMARY KEY,
        user_id         INTEGER NOT NULL REFERENCES users (id),
        listing_id      INTEGER NOT NULL REFERENCES listings (id),
        created_at      BIGINT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS reservations (
        id              SERIAL PRIMARY KEY,
        user_id         INTEGER NOT NULL REFERENCES users (id),
        listing_id      INTEGER NOT NULL REFERENCES listings (id),
        created_at      BIGINT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS image_files (
        id              SERIAL PRIMARY KEY,
        file_path       VARCHAR(255) NOT NULL,
        listing_id      INTEGER NOT NULL REFERENCES listings (id),
        book_id         INTEGER REFERENCES books (id)
    );
";

/// Columns read by [`listing_summary_from_row`], expects `listings l` joined with `books b`
const LISTING_SUMMARY_COLUMNS: &str = "l.id, l.book_id, b.title, b.author, l.price_cents, \
     l.condition, l.status, l.user_id, \
     (SELECT i.file_path FROM image_files i WHERE i.listing_id = l.id ORDER BY i.id LIMIT 1)";

const LISTING_SUMMARY_COLUMN_COUNT: usize = 9;

fn listing_summary_from_row(row: &Row, offset: usize) -> Result<ListingSummary, MarketplaceError> {
    let status: String = row.try_get(offset + 6)?;
    Ok(ListingSummary {
        listing_id: row.try_get(offset)?,
        book_id: row.try_get(offset + 1)?,
        title: row.try_get(offset + 2)?,
        author: row.try_get(offset + 3)?,
        price_cents: row.try_get(offset + 4)?,
        condition: row.try_get(offset + 5)?,
        status: status.parse().map_err(MarketplaceError::Other)?,
        owner_id: row.try_get(offset + 7)?,
        image_url: row.try_get(offset + 8)?,
    })
}

fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.as_db_error()
        .map(|db_err| db_err.code() == &SqlState::UNIQUE_VIOLATION)
        .unwrap_or_default()
}

fn violated_constraint(err: &tokio_postgres::Error) -> Option<&str> {
    err.as_db_error().and_then(|db_err| db_err.constraint())
}

async fn listing_state(
    transaction: &Transaction<'_>,
    listing_id: ListingId,
) -> Result<ListingState, MarketplaceError> {
    let row = transaction
        .query_opt(
            "SELECT user_id, status FROM listings WHERE id = $1",
            &[&listing_id],
        )
        .await?
        .ok_or(MarketplaceError::ListingNotFound(listing_id))?;
    let status: String = row.try_get(1)?;
    Ok(ListingState {
        listing_id,
        owner_id: row.try_get(0)?,
        status: status.parse().map_err(MarketplaceError::Other)?,
    })
}

async fn set_status(
    transaction: &Transaction<'_>,
    listing_id: ListingId,
    status: ListingStatus,
) -> Result<(), MarketplaceError> {
    transaction
        .execute(
            "UPDATE listings SET status = $1 WHERE id = $2",
            &[&status.as_str(), &listing_id],
        )
        .await?;
    Ok(())
}

/// Returns (reservation holder, reserved listing)
async fn reservation_owner_and_listing(
    transaction: &Transaction<'_>,
    reservation_id: ReservationId,
) -> Result<(UserId, ListingId), MarketplaceError> {
    let row = transaction
        .query_opt(
            "SELECT user_id, listing_id FROM reservations WHERE id = $1",
            &[&reservation_id],
        )
        .await?
        .ok_or(MarketplaceError::ReservationNotFound(reservation_id))?;
    Ok((row.try_get(0)?, row.try_get(1)?))
}

async fn insert_transaction(
    transaction: &Transaction<'_>,
    buyer: UserId,
    listing_id: ListingId,
) -> Result<TransactionId, MarketplaceError> {
    let row = transaction
        .query_one(
            "INSERT INTO transactions (user_id, listing_id, created_at) VALUES ($1, $2, $3) RETURNING id",
            &[&buyer, &listing_id, &now_unix_seconds()],
        )
        .await?;
    Ok(row.try_get(0)?)
}

pub struct PostgresMarketplaceRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

pub struct PostgresMarketplaceRepository {
    /// Locked for the whole request so that each operation can run in its own transaction
    client: Mutex<Client>,
}

impl PostgresMarketplaceRepository {
    pub async fn init(config: PostgresMarketplaceRepositoryConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}",
            config.username, config.password, config.hostname
        );
        tracing::info!(
            "Postgres connection to {} as {}",
            config.hostname,
            config.username
        );
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Postgres connection error: {}", e);
            }
        });

        client
            .batch_execute(SCHEMA)
            .await
            .context("Failed to setup marketplace tables")?;

        Ok(Self {
            client: Mutex::new(client),
        })
    }

    async fn query_summaries(
        &self,
        filter: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<ListingSummary>, MarketplaceError> {
        let query = format!(
            "SELECT {} FROM listings l JOIN books b ON b.id = l.book_id {} ORDER BY l.id",
            LISTING_SUMMARY_COLUMNS, filter
        );
        let client = self.client.lock().await;
        let rows = client.query(&query, params).await?;
        rows.iter()
            .map(|row| listing_summary_from_row(row, 0))
            .collect()
    }
}

#[async_trait::async_trait]
impl MarketplaceRepository for PostgresMarketplaceRepository {
    async fn register_user(&self, user: NewUser) -> Result<UserId, MarketplaceError> {
        validate_new_user(&user)?;
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let taken = transaction
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM users WHERE name = $1), \
                        EXISTS (SELECT 1 FROM users WHERE email = $2)",
                &[&user.name, &user.email],
            )
            .await?;
        let name_taken: bool = taken.try_get(0)?;
        let email_taken: bool = taken.try_get(1)?;
        if name_taken || email_taken {
            return Err(MarketplaceError::RegistrationConflict {
                name_taken,
                email_taken,
            });
        }

        let inserted = transaction
            .query_one(
                "INSERT INTO users (name, email, password, phone_number) VALUES ($1, $2, $3, $4) RETURNING id",
                &[&user.name, &user.email, &user.password_hash, &user.phone_number],
            )
            .await;
        let user_id: UserId = match inserted {
            Ok(row) => row.try_get(0)?,
            Err(err) if is_unique_violation(&err) => {
                let constraint = violated_constraint(&err).unwrap_or_default();
                return Err(MarketplaceError::RegistrationConflict {
                    name_taken: constraint.contains("name"),
                    email_taken: constraint.contains("email"),
                });
            }
            Err(err) => return Err(err.into()),
        };

        transaction.commit().await?;
        Ok(user_id)
    }

    async fn get_credentials(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentials>, MarketplaceError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt("SELECT id, password FROM users WHERE email = $1", &[&email])
            .await?;
        row.map(|row| {
            Ok(UserCredentials {
                user_id: row.try_get(0)?,
                password_hash: row.try_get(1)?,
            })
        })
        .transpose()
    }

    async fn list_listings_by_status(
        &self,
        status: ListingStatus,
    ) -> Result<Vec<ListingSummary>, MarketplaceError> {
        self.query_summaries("WHERE l.status = $1", &[&status.as_str()])
            .await
    }

    async fn add_listing(
        &self,
        owner_id: UserId,
        listing: NewListing,
        image_url: Option<String>,
    ) -> Result<ListingId, MarketplaceError> {
        validate_new_listing(&listing)?;
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let existing_book = transaction
            .query_opt(
                "SELECT id FROM books WHERE title = $1 AND author = $2 ORDER BY id LIMIT 1",
                &[&listing.book.title, &listing.book.author],
            )
            .await?;
        let book_id: i32 = match existing_book {
            Some(row) => row.try_get(0)?,
            None => {
                let inserted = transaction
                    .query_one(
                        "INSERT INTO books (isbn, author, title, description, year) VALUES ($1, $2, $3, $4, $5) RETURNING id",
                        &[
                            &listing.book.isbn,
                            &listing.book.author,
                            &listing.book.title,
                            &listing.book.description,
                            &listing.book.year,
                        ],
                    )
                    .await;
                match inserted {
                    Ok(row) => row.try_get(0)?,
                    Err(err) if is_unique_violation(&err) => {
                        return Err(MarketplaceError::DuplicateIsbn(listing.book.isbn))
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        let row = transaction
            .query_one(
                "INSERT INTO listings (price_cents, condition, status, user_id, book_id) VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[
                    &listing.price_cents,
                    &listing.condition,
                    &ListingStatus::Available.as_str(),
                    &owner_id,
                    &book_id,
                ],
            )
            .await?;
        let listing_id: ListingId = row.try_get(0)?;

        if let Some(file_path) = image_url {
            transaction
                .execute(
                    "INSERT INTO image_files (file_path, listing_id) VALUES ($1, $2)",
                    &[&file_path, &listing_id],
                )
                .await?;
        }

        transaction.commit().await?;
        Ok(listing_id)
    }

    async fn list_user_listings(
        &self,
        owner_id: UserId,
    ) -> Result<Vec<ListingSummary>, MarketplaceError> {
        self.query_summaries("WHERE l.user_id = $1", &[&owner_id])
            .await
    }

    async fn get_listing_detail(
        &self,
        listing_id: ListingId,
    ) -> Result<ListingDetail, MarketplaceError> {
        let client = self.client.lock().await;

        let query = format!(
            "SELECT {}, b.isbn, b.year, b.description, u.name \
             FROM listings l JOIN books b ON b.id = l.book_id JOIN users u ON u.id = l.user_id \
             WHERE l.id = $1",
            LISTING_SUMMARY_COLUMNS
        );
        let row = client
            .query_opt(&query, &[&listing_id])
            .await?
            .ok_or(MarketplaceError::ListingNotFound(listing_id))?;
        let listing = listing_summary_from_row(&row, 0)?;
        let book = BookRecord {
            book_id: listing.book_id,
            details: BookDetails {
                title: listing.title.clone(),
                author: listing.author.clone(),
                isbn: row.try_get(LISTING_SUMMARY_COLUMN_COUNT)?,
                year: row.try_get(LISTING_SUMMARY_COLUMN_COUNT + 1)?,
                description: row.try_get(LISTING_SUMMARY_COLUMN_COUNT + 2)?,
            },
        };
        let seller_name: String = row.try_get(LISTING_SUMMARY_COLUMN_COUNT + 3)?;

        let image_urls = client
            .query(
                "SELECT file_path FROM image_files WHERE listing_id = $1 ORDER BY id",
                &[&listing_id],
            )
            .await?
            .iter()
            .map(|row| row.try_get(0))
            .collect::<Result<Vec<String>, _>>()?;

        let reviews = client
            .query(
                "SELECT r.id, r.user_id, u.name, r.rating, r.comment, r.created_at \
                 FROM reviews r JOIN users u ON u.id = r.user_id \
                 WHERE r.listing_id = $1 ORDER BY r.id",
                &[&listing_id],
            )
            .await?
            .iter()
            .map(|row| {
                Ok(ReviewRecord {
                    review_id: row.try_get(0)?,
                    user_id: row.try_get(1)?,
                    reviewer_name: row.try_get(2)?,
                    rating: row.try_get(3)?,
                    comment: row.try_get(4)?,
                    created_at: row.try_get(5)?,
                })
            })
            .collect::<Result<Vec<_>, MarketplaceError>>()?;

        Ok(ListingDetail {
            listing,
            book,
            seller_name,
            image_urls,
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
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let state = listing_state(&transaction, listing_id).await?;
        listing_lifecycle::authorize(ListingAction::Edit, actor, &state)?;

        if patch.touches_book() {
            let updated = transaction
                .execute(
                    "UPDATE books SET title = COALESCE($1, title), author = COALESCE($2, author), \
                     isbn = COALESCE($3, isbn), year = COALESCE($4, year), \
                     description = COALESCE($5, description) \
                     WHERE id = (SELECT book_id FROM listings WHERE id = $6)",
                    &[
                        &patch.title,
                        &patch.author,
                        &patch.isbn,
                        &patch.year,
                        &patch.description,
                        &listing_id,
                    ],
                )
                .await;
            match updated {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Err(MarketplaceError::DuplicateIsbn(
                        patch.isbn.unwrap_or_default(),
                    ))
                }
                Err(err) => return Err(err.into()),
            }
        }

        transaction
            .execute(
                "UPDATE listings SET price_cents = COALESCE($1, price_cents), \
                 condition = COALESCE($2, condition) WHERE id = $3",
                &[&patch.price_cents, &patch.condition, &listing_id],
            )
            .await?;

        let mut outcome = ListingEditOutcome::default();
        if let Some(new_url) = new_image_url {
            let first_image = transaction
                .query_opt(
                    "SELECT id, file_path FROM image_files WHERE listing_id = $1 ORDER BY id LIMIT 1",
                    &[&listing_id],
                )
                .await?;
            match first_image {
                Some(row) => {
                    let image_id: i32 = row.try_get(0)?;
                    outcome.replaced_image_url = Some(row.try_get(1)?);
                    transaction
                        .execute(
                            "UPDATE image_files SET file_path = $1 WHERE id = $2",
                            &[&new_url, &image_id],
                        )
                        .await?;
                }
                None => {
                    transaction
                        .execute(
                            "INSERT INTO image_files (file_path, listing_id) VALUES ($1, $2)",
                            &[&new_url, &listing_id],
                        )
                        .await?;
                }
            }
        }

        transaction.commit().await?;
        Ok(outcome)
    }

    async fn delete_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<DeletedListing, MarketplaceError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let state = listing_state(&transaction, listing_id).await?;
        listing_lifecycle::authorize(ListingAction::Delete, actor, &state)?;

        let title: String = transaction
            .query_one(
                "SELECT b.title FROM listings l JOIN books b ON b.id = l.book_id WHERE l.id = $1",
                &[&listing_id],
            )
            .await?
            .try_get(0)?;

        transaction
            .execute("DELETE FROM favorites WHERE listing_id = $1", &[&listing_id])
            .await?;
        transaction
            .execute("DELETE FROM reviews WHERE listing_id = $1", &[&listing_id])
            .await?;
        let image_urls = transaction
            .query(
                "DELETE FROM image_files WHERE listing_id = $1 RETURNING file_path",
                &[&listing_id],
            )
            .await?
            .iter()
            .map(|row| row.try_get(0))
            .collect::<Result<Vec<String>, _>>()?;
        transaction
            .execute("DELETE FROM listings WHERE id = $1", &[&listing_id])
            .await?;

        transaction.commit().await?;
        Ok(DeletedListing { title, image_urls })
    }

    async fn add_favorite(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<(), MarketplaceError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let state = listing_state(&transaction, listing_id).await?;
        listing_lifecycle::authorize(ListingAction::Favorite, actor, &state)?;

        let inserted = transaction
            .execute(
                "INSERT INTO favorites (user_id, listing_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&actor, &listing_id],
            )
            .await?;
        if inserted == 0 {
            return Err(MarketplaceError::AlreadyFavorited(listing_id));
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn remove_favorite(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<(), MarketplaceError> {
        let client = self.client.lock().await;
        let removed = client
            .execute(
                "DELETE FROM favorites WHERE user_id = $1 AND listing_id = $2",
                &[&actor, &listing_id],
            )
            .await?;
        if removed == 0 {
            Err(MarketplaceError::NotInFavorites(listing_id))
        } else {
            Ok(())
        }
    }

    async fn list_favorites(&self, actor: UserId) -> Result<Vec<ListingSummary>, MarketplaceError> {
        self.query_summaries(
            "JOIN favorites f ON f.listing_id = l.id WHERE f.user_id = $1",
            &[&actor],
        )
        .await
    }

    async fn add_review(
        &self,
        actor: UserId,
        listing_id: ListingId,
        review: NewReviewRequest,
    ) -> Result<ReviewId, MarketplaceError> {
        validate_review(&review)?;
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        listing_state(&transaction, listing_id).await?;

        let inserted = transaction
            .query_opt(
                "INSERT INTO reviews (comment, rating, created_at, user_id, listing_id) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (user_id, listing_id) DO NOTHING RETURNING id",
                &[
                    &review.comment,
                    &review.rating,
                    &now_unix_seconds(),
                    &actor,
                    &listing_id,
                ],
            )
            .await?;
        let review_id: ReviewId = inserted
            .ok_or(MarketplaceError::AlreadyReviewed(listing_id))?
            .try_get(0)?;

        transaction.commit().await?;
        Ok(review_id)
    }

    async fn search_listings(&self, query: &str) -> Result<Vec<ListingSummary>, MarketplaceError> {
        self.query_summaries(
            "WHERE strpos(lower(b.title), lower($1)) > 0 OR strpos(lower(b.author), lower($1)) > 0",
            &[&query],
        )
        .await
    }

    async fn buy_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<TransactionId, MarketplaceError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let state = listing_state(&transaction, listing_id).await?;
        listing_lifecycle::authorize(ListingAction::Buy, actor, &state)?;

        let transaction_id = insert_transaction(&transaction, actor, listing_id).await?;
        set_status(
            &transaction,
            listing_id,
            listing_lifecycle::next_status(ListingAction::Buy, state.status),
        )
        .await?;

        transaction.commit().await?;
        Ok(transaction_id)
    }

    async fn list_purchases(&self, actor: UserId) -> Result<Vec<PurchaseRecord>, MarketplaceError> {
        let query = format!(
            "SELECT t.id, t.created_at, {} FROM transactions t \
             JOIN listings l ON l.id = t.listing_id JOIN books b ON b.id = l.book_id \
             WHERE t.user_id = $1 ORDER BY t.id",
            LISTING_SUMMARY_COLUMNS
        );
        let client = self.client.lock().await;
        let rows = client.query(&query, &[&actor]).await?;
        rows.iter()
            .map(|row| {
                Ok(PurchaseRecord {
                    transaction_id: row.try_get(0)?,
                    purchased_at: row.try_get(1)?,
                    listing: listing_summary_from_row(row, 2)?,
                })
            })
            .collect()
    }

    async fn reserve_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
    ) -> Result<ReservationId, MarketplaceError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let state = listing_state(&transaction, listing_id).await?;
        listing_lifecycle::authorize(ListingAction::Reserve, actor, &state)?;

        let reservation_id: ReservationId = transaction
            .query_one(
                "INSERT INTO reservations (user_id, listing_id, created_at) VALUES ($1, $2, $3) RETURNING id",
                &[&actor, &listing_id, &now_unix_seconds()],
            )
            .await?
            .try_get(0)?;
        set_status(
            &transaction,
            listing_id,
            listing_lifecycle::next_status(ListingAction::Reserve, state.status),
        )
        .await?;

        transaction.commit().await?;
        Ok(reservation_id)
    }

    async fn delete_reservation(
        &self,
        actor: UserId,
        reservation_id: ReservationId,
    ) -> Result<(), MarketplaceError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let (holder, listing_id) = reservation_owner_and_listing(&transaction, reservation_id).await?;
        if holder != actor {
            return Err(MarketplaceError::NotReservationHolder(reservation_id));
        }

        let state = listing_state(&transaction, listing_id).await?;
        listing_lifecycle::authorize(ListingAction::CancelReservation, actor, &state)?;
        set_status(
            &transaction,
            listing_id,
            listing_lifecycle::next_status(ListingAction::CancelReservation, state.status),
        )
        .await?;
        transaction
            .execute("DELETE FROM reservations WHERE id = $1", &[&reservation_id])
            .await?;

        transaction.commit().await?;
        Ok(())
    }

    async fn list_reservations(
        &self,
        actor: UserId,
    ) -> Result<Vec<ReservationRecord>, MarketplaceError> {
        let query = format!(
            "SELECT r.id, r.created_at, {} FROM reservations r \
             JOIN listings l ON l.id = r.listing_id JOIN books b ON b.id = l.book_id \
             WHERE r.user_id = $1 ORDER BY r.id",
            LISTING_SUMMARY_COLUMNS
        );
        let client = self.client.lock().await;
        let rows = client.query(&query, &[&actor]).await?;
        rows.iter()
            .map(|row| {
                Ok(ReservationRecord {
                    reservation_id: row.try_get(0)?,
                    reserved_at: row.try_get(1)?,
                    listing: listing_summary_from_row(row, 2)?,
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
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;

        let state = listing_state(&transaction, listing_id).await?;
        let (holder, reserved_listing) =
            reservation_owner_and_listing(&transaction, reservation_id).await?;
        if holder != actor {
            return Err(MarketplaceError::NotReservationHolder(reservation_id));
        }
        if reserved_listing != listing_id {
            return Err(MarketplaceError::ReservationListingMismatch {
                reservation_id,
                listing_id,
            });
        }
        listing_lifecycle::authorize(ListingAction::BuyReserved, actor, &state)?;

        let transaction_id = insert_transaction(&transaction, actor, listing_id).await?;
        transaction
            .execute("DELETE FROM reservations WHERE id = $1", &[&reservation_id])
            .await?;
        set_status(
            &transaction,
            listing_id,
            listing_lifecycle::next_status(ListingAction::BuyReserved, state.status),
        )
        .await?;

        transaction.commit().await?;
        Ok(transaction_id)
    }
}
