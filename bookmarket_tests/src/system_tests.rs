use std::time::UNIX_EPOCH;

use base64::Engine;
use bookmarket_service::api::{
    BookDetails, EditListingRequest, ImageUpload, ListingPatch, ListingStatus, NewListingRequest,
    NewReviewRequest, RegisterRequest,
};
use bookmarket_service::client::{BookMarketClient, RegistrationOutcome};
use rand::Rng;

fn server_url() -> String {
    std::env::var("BOOKMARKET_URL").unwrap_or("http://127.0.0.1:8080".to_string())
}

fn unique_suffix() -> String {
    format!(
        "{}{}",
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
        rand::thread_rng().gen_range(0..1_000_000)
    )
}

/// Registers a new user and returns a client logged in as that user
async fn logged_in_client(prefix: &str) -> BookMarketClient {
    let client = BookMarketClient::new(&server_url()).expect("Failed to create client");
    let name = format!("{}{}", prefix, unique_suffix());
    let request = RegisterRequest {
        name: name.clone(),
        email: format!("{}@example.com", name),
        password: "secret-password".to_string(),
        phone_number: None,
    };
    assert_eq!(
        client.register(&request).await.expect("Failed to register"),
        RegistrationOutcome::Registered
    );
    assert!(client
        .login(&request.email, &request.password)
        .await
        .expect("Failed to login"));
    client
}

fn listing_request(suffix: &str) -> NewListingRequest {
    NewListingRequest {
        book: BookDetails {
            title: format!("Title{}", suffix),
            author: "Author1".to_string(),
            isbn: format!("isbn-{}", suffix),
            year: Some(2001),
            description: Some("Description1".to_string()),
        },
        price_cents: 1999,
        condition: "Good".to_string(),
        image: Some(ImageUpload {
            filename: "cover.png".to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(b"fake png"),
        }),
    }
}

#[tokio::test]
/// Registration and session handling
/// Registers a user, registering again reports both name and email taken
/// Wrong password is rejected
/// Logout ends the session
async fn bookmarket_users_e2e_test() {
    let client = BookMarketClient::new(&server_url()).expect("Failed to create client");
    let name = format!("User{}", unique_suffix());
    let request = RegisterRequest {
        name: name.clone(),
        email: format!("{}@example.com", name),
        password: "secret-password".to_string(),
        phone_number: Some("0612345678".to_string()),
    };

    assert_eq!(
        client.register(&request).await.expect("Failed to register"),
        RegistrationOutcome::Registered
    );
    match client.register(&request).await.expect("Failed to register") {
        RegistrationOutcome::Rejected(errors) => {
            assert!(errors.name_error.is_some());
            assert!(errors.email_error.is_some());
        }
        RegistrationOutcome::Registered => panic!("Duplicate registration accepted"),
    }

    assert!(!client
        .login(&request.email, "wrong-password")
        .await
        .expect("Failed to login"));
    assert!(client
        .login(&request.email, &request.password)
        .await
        .expect("Failed to login"));
    assert!(client.my_listings().await.is_ok());

    assert!(client.logout().await.expect("Failed to logout").is_success());
    assert!(client.my_listings().await.is_err());
}

#[tokio::test]
/// Full listing lifecycle between a seller and a buyer
/// Seller adds a listing with image and edits it
/// Buyer favorites, reviews and finds it through search
/// Buyer reserves, cancels, reserves again and buys the reserved listing
/// Sold listing cannot be deleted or favorited
async fn bookmarket_listing_lifecycle_e2e_test() {
    let seller = logged_in_client("Seller").await;
    let buyer = logged_in_client("Buyer").await;
    let suffix = unique_suffix();

    // ADD LISTING
    let listing_id = seller
        .add_listing(&listing_request(&suffix))
        .await
        .expect("Failed to add listing");
    let detail = buyer
        .listing_detail(listing_id)
        .await
        .expect("Failed to get listing")
        .expect("Listing not found");
    assert_eq!(detail.listing.status, ListingStatus::Available);
    assert_eq!(detail.image_urls.len(), 1);

    // EDIT LISTING
    let edit = EditListingRequest {
        changes: ListingPatch {
            price_cents: Some(1499),
            ..ListingPatch::default()
        },
        image: None,
    };
    assert!(seller
        .edit_listing(listing_id, &edit)
        .await
        .expect("Failed to edit listing")
        .is_success());
    assert!(!buyer
        .edit_listing(listing_id, &edit)
        .await
        .expect("Failed to edit listing")
        .is_success());
    assert_eq!(
        seller
            .listing_for_edit(listing_id)
            .await
            .expect("Failed to get listing")
            .listing
            .price_cents,
        1499
    );

    // FAVORITES AND REVIEWS
    assert!(!seller
        .add_to_favorites(listing_id)
        .await
        .expect("Failed to favorite")
        .is_success());
    assert!(buyer
        .add_to_favorites(listing_id)
        .await
        .expect("Failed to favorite")
        .is_success());
    assert!(buyer
        .my_favorites()
        .await
        .expect("Failed to get favorites")
        .iter()
        .any(|listing| listing.listing_id == listing_id));
    let review = NewReviewRequest {
        rating: 4,
        comment: "Nice copy".to_string(),
    };
    assert!(buyer
        .add_review(listing_id, &review)
        .await
        .expect("Failed to review")
        .is_success());
    assert!(!buyer
        .add_review(listing_id, &review)
        .await
        .expect("Failed to review")
        .is_success());

    // SEARCH
    let results = buyer
        .search(&format!("title{}", suffix))
        .await
        .expect("Failed to search");
    assert!(results
        .results
        .iter()
        .any(|listing| listing.listing_id == listing_id));

    // RESERVE AND CANCEL
    let reservation = buyer
        .reserve_listing(listing_id)
        .await
        .expect("Failed to reserve");
    assert!(reservation.is_success());
    let reservation_id = reservation.created_id.expect("No reservation id");
    assert!(!seller
        .delete_listing(listing_id)
        .await
        .expect("Failed to delete")
        .is_success());
    assert!(buyer
        .delete_reservation(reservation_id)
        .await
        .expect("Failed to cancel reservation")
        .is_success());
    assert!(buyer
        .my_reservations()
        .await
        .expect("Failed to get reservations")
        .is_empty());

    // RESERVE AND BUY
    let reservation_id = buyer
        .reserve_listing(listing_id)
        .await
        .expect("Failed to reserve")
        .created_id
        .expect("No reservation id");
    assert!(buyer
        .buy_reserved_listing(listing_id, reservation_id)
        .await
        .expect("Failed to buy")
        .is_success());
    let purchases = buyer.my_purchases().await.expect("Failed to get purchases");
    assert!(purchases
        .iter()
        .any(|purchase| purchase.listing.listing_id == listing_id
            && purchase.listing.status == ListingStatus::Sold));

    // SOLD IS FINAL
    assert!(!seller
        .delete_listing(listing_id)
        .await
        .expect("Failed to delete")
        .is_success());
    assert!(!buyer
        .buy_listing(listing_id)
        .await
        .expect("Failed to buy")
        .is_success());
    assert!(buyer
        .index()
        .await
        .expect("Failed to get index")
        .sold_listings
        .iter()
        .any(|listing| listing.listing_id == listing_id));
}

#[tokio::test]
/// Direct purchase and deletion of a listing nobody reserved
async fn bookmarket_buy_and_delete_e2e_test() {
    let seller = logged_in_client("Seller").await;
    let buyer = logged_in_client("Buyer").await;

    let sold_listing = seller
        .add_listing(&listing_request(&unique_suffix()))
        .await
        .expect("Failed to add listing");
    assert!(!seller
        .buy_listing(sold_listing)
        .await
        .expect("Failed to buy")
        .is_success());
    assert!(buyer
        .buy_listing(sold_listing)
        .await
        .expect("Failed to buy")
        .is_success());

    let deleted_listing = seller
        .add_listing(&listing_request(&unique_suffix()))
        .await
        .expect("Failed to add listing");
    assert!(seller
        .delete_listing(deleted_listing)
        .await
        .expect("Failed to delete")
        .is_success());
    assert!(buyer
        .listing_detail(deleted_listing)
        .await
        .expect("Failed to get listing")
        .is_none());
}
