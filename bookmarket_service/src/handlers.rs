use std::sync::Arc;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::header::LOCATION;
use actix_web::web::Data;
use actix_web::{Error, HttpResponse};
use paperclip::actix::{
    api_v2_operation,
    web::{self},
};

use crate::api::{
    EditListingRequest, Flash, FlashCategory, ImageUpload, IndexPage, ListingId, ListingStatus,
    ListingsResponse, LoginRequest, NewListingRequest, NewReviewRequest, PurchasesResponse,
    RegisterRequest, RegistrationErrors, ReservationId, ReservationsResponse, ReservedListingPath,
    SearchQuery, SearchResults, SESSION_COOKIE,
};
use crate::app_config::WebSettings;
use crate::auth::{AuthenticatedUser, OptionalUser};
use crate::flash;
use crate::image_storage::{remove_images_best_effort, ImageStorage};
use crate::image_upload::prepare_upload;
use crate::marketplace_repository::{MarketplaceError, MarketplaceRepository, NewListing, NewUser};
use crate::sessions::{hash_password, verify_password, SessionStore};

type Repository = Data<Arc<dyn MarketplaceRepository>>;
type Storage = Data<Arc<dyn ImageStorage>>;

fn listing_detail_page(listing_id: ListingId) -> String {
    format!("/listing_detail/{}", listing_id)
}

/// Validates and uploads the image if one was sent.
/// Images with unsupported extensions are skipped, giving Ok(None)
async fn store_image(
    storage: &dyn ImageStorage,
    image: Option<&ImageUpload>,
    settings: &WebSettings,
    redirect_to: &str,
) -> Result<Option<String>, HttpResponse> {
    let Some(image) = image else {
        return Ok(None);
    };
    let prepared = match prepare_upload(image, settings.max_upload_bytes) {
        Ok(Some(prepared)) => prepared,
        Ok(None) => return Ok(None),
        Err(err) => return Err(flash::upload_rejected(&err, redirect_to)),
    };
    storage
        .upload(&prepared.filename, prepared.content_type, prepared.bytes)
        .await
        .map(Some)
        .map_err(|err| flash::upload_failed(&err, redirect_to))
}

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
/// Available and sold listings, reserved ones only for logged in users
pub async fn index(
    repository: Repository,
    user: OptionalUser,
) -> Result<HttpResponse, Error> {
    let page = async {
        let reserved_listings = match user.0 {
            Some(_) => Some(
                repository
                    .list_listings_by_status(ListingStatus::Reserved)
                    .await?,
            ),
            None => None,
        };
        Ok::<_, MarketplaceError>(IndexPage {
            available_listings: repository
                .list_listings_by_status(ListingStatus::Available)
                .await?,
            reserved_listings,
            sold_listings: repository
                .list_listings_by_status(ListingStatus::Sold)
                .await?,
        })
    };
    Ok(match page.await {
        Ok(page) => HttpResponse::Ok().json(page),
        Err(err) => flash::error_response(&err, "/"),
    })
}

#[api_v2_operation]
pub async fn register(
    repository: Repository,
    request: web::Json<RegisterRequest>,
) -> Result<HttpResponse, Error> {
    let request = request.into_inner();
    if request.password.is_empty() {
        return Ok(flash::error_response(
            &MarketplaceError::InvalidInput("password must not be empty".to_string()),
            "/register",
        ));
    }
    let password_hash = match hash_password(&request.password) {
        Ok(password_hash) => password_hash,
        Err(err) => {
            tracing::error!("Register failed {:#}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };

    let new_user = NewUser {
        name: request.name,
        email: request.email,
        password_hash,
        phone_number: request.phone_number,
    };
    Ok(match repository.register_user(new_user).await {
        Ok(user_id) => {
            tracing::info!("Registered user {}", user_id);
            flash::success("Registration successful! Please log in.", "/login")
        }
        Err(MarketplaceError::RegistrationConflict {
            name_taken,
            email_taken,
        }) => HttpResponse::Conflict().json(RegistrationErrors {
            name_error: name_taken.then(|| "This name is already taken.".to_string()),
            email_error: email_taken.then(|| "This email is already registered.".to_string()),
        }),
        Err(err) => flash::error_response(&err, "/register"),
    })
}

#[api_v2_operation]
pub async fn login(
    repository: Repository,
    sessions: Data<SessionStore>,
    settings: Data<WebSettings>,
    request: web::Json<LoginRequest>,
) -> Result<HttpResponse, Error> {
    let credentials = match repository.get_credentials(&request.email).await {
        Ok(credentials) => credentials,
        Err(err) => return Ok(flash::error_response(&err, "/login")),
    };
    let user_id = match credentials {
        Some(credentials) if verify_password(&request.password, &credentials.password_hash) => {
            credentials.user_id
        }
        _ => {
            return Ok(HttpResponse::Unauthorized().json(Flash::new(
                FlashCategory::Danger,
                "Invalid login credentials.",
                "/login",
            )))
        }
    };

    let cookie = Cookie::build(SESSION_COOKIE, sessions.create(user_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(settings.secure_cookies)
        .finish();
    Ok(HttpResponse::Ok().cookie(cookie).json(Flash::new(
        FlashCategory::Success,
        "Login successful!",
        "/",
    )))
}

#[api_v2_operation]
pub async fn logout(
    sessions: Data<SessionStore>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    sessions.remove(&user.session_token);
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookie.make_removal();
    Ok(HttpResponse::Ok().cookie(cookie).json(Flash::new(
        FlashCategory::Info,
        "Successfully logged out!",
        "/",
    )))
}

#[api_v2_operation]
pub async fn add_listing(
    repository: Repository,
    storage: Storage,
    settings: Data<WebSettings>,
    user: AuthenticatedUser,
    request: web::Json<NewListingRequest>,
) -> Result<HttpResponse, Error> {
    let request = request.into_inner();
    let image_url = match store_image(
        storage.get_ref().as_ref(),
        request.image.as_ref(),
        &settings,
        "/add_listing",
    )
    .await
    {
        Ok(image_url) => image_url,
        Err(response) => return Ok(response),
    };

    let listing = NewListing {
        book: request.book,
        price_cents: request.price_cents,
        condition: request.condition,
    };
    Ok(
        match repository
            .add_listing(user.user_id, listing, image_url.clone())
            .await
        {
            Ok(listing_id) => {
                let mut response = flash::success("Listing successfully added!", "/my_listings");
                if let Ok(location) = listing_detail_page(listing_id).parse() {
                    response.headers_mut().insert(LOCATION, location);
                }
                response
            }
            Err(err) => {
                remove_images_best_effort(storage.get_ref().as_ref(), &Vec::from_iter(image_url))
                    .await;
                flash::error_response(&err, "/add_listing")
            }
        },
    )
}

#[api_v2_operation]
pub async fn my_listings(
    repository: Repository,
    user: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    Ok(match repository.list_user_listings(user.user_id).await {
        Ok(listings) => HttpResponse::Ok().json(ListingsResponse { listings }),
        Err(err) => flash::error_response(&err, "/"),
    })
}

#[api_v2_operation]
/// Listing detail for its owner, to fill the edit form
pub async fn get_listing_for_edit(
    repository: Repository,
    user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match repository.get_listing_detail(listing_id.into_inner()).await {
            Ok(detail) if detail.listing.owner_id == user.user_id => {
                HttpResponse::Ok().json(detail)
            }
            Ok(_) => HttpResponse::Forbidden().json(Flash::new(
                FlashCategory::Danger,
                "You are not authorized to edit this listing.",
                "/my_listings",
            )),
            Err(err) => flash::error_response(&err, "/my_listings"),
        },
    )
}

#[api_v2_operation]
pub async fn edit_listing(
    repository: Repository,
    storage: Storage,
    settings: Data<WebSettings>,
    user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
    request: web::Json<EditListingRequest>,
) -> Result<HttpResponse, Error> {
    let listing_id = listing_id.into_inner();
    let request = request.into_inner();
    let edit_page = format!("/edit_listings/{}", listing_id);
    let new_image_url = match store_image(
        storage.get_ref().as_ref(),
        request.image.as_ref(),
        &settings,
        &edit_page,
    )
    .await
    {
        Ok(image_url) => image_url,
        Err(response) => return Ok(response),
    };

    Ok(
        match repository
            .edit_listing(
                user.user_id,
                listing_id,
                request.changes,
                new_image_url.clone(),
            )
            .await
        {
            Ok(outcome) => {
                remove_images_best_effort(
                    storage.get_ref().as_ref(),
                    &Vec::from_iter(outcome.replaced_image_url),
                )
                .await;
                flash::success("Listing updated successfully!", "/my_listings")
            }
            Err(err) => {
                remove_images_best_effort(
                    storage.get_ref().as_ref(),
                    &Vec::from_iter(new_image_url),
                )
                .await;
                flash::error_response(&err, "/my_listings")
            }
        },
    )
}

#[api_v2_operation]
pub async fn delete_listing(
    repository: Repository,
    storage: Storage,
    user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match repository
            .delete_listing(user.user_id, listing_id.into_inner())
            .await
        {
            Ok(deleted) => {
                remove_images_best_effort(storage.get_ref().as_ref(), &deleted.image_urls).await;
                flash::success(
                    format!("Listing '{}' successfully deleted!", deleted.title),
                    "/my_listings",
                )
            }
            Err(err) => flash::error_response(&err, "/my_listings"),
        },
    )
}

#[api_v2_operation]
pub async fn add_to_favorites(
    repository: Repository,
    user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
) -> Result<HttpResponse, Error> {
    let listing_id = listing_id.into_inner();
    Ok(
        match repository.add_favorite(user.user_id, listing_id).await {
            Ok(()) => flash::success("Listing added to favorites!", "/my_favorites"),
            Err(err @ MarketplaceError::AlreadyFavorited(_)) => {
                flash::error_response(&err, "/my_favorites")
            }
            Err(err) => flash::error_response(&err, &listing_detail_page(listing_id)),
        },
    )
}

#[api_v2_operation]
pub async fn remove_from_favorites(
    repository: Repository,
    user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match repository
            .remove_favorite(user.user_id, listing_id.into_inner())
            .await
        {
            Ok(()) => flash::success("Listing removed from favorites!", "/my_favorites"),
            Err(err) => flash::error_response(&err, "/my_favorites"),
        },
    )
}

#[api_v2_operation]
pub async fn my_favorites(
    repository: Repository,
    user: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    Ok(match repository.list_favorites(user.user_id).await {
        Ok(listings) => HttpResponse::Ok().json(ListingsResponse { listings }),
        Err(err) => flash::error_response(&err, "/"),
    })
}

#[api_v2_operation]
/// Listing shown above the review form
pub async fn get_listing_for_review(
    repository: Repository,
    _user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match repository.get_listing_detail(listing_id.into_inner()).await {
            Ok(detail) => HttpResponse::Ok().json(detail),
            Err(err) => flash::error_response(&err, "/"),
        },
    )
}

#[api_v2_operation]
pub async fn add_review(
    repository: Repository,
    user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
    review: web::Json<NewReviewRequest>,
) -> Result<HttpResponse, Error> {
    let listing_id = listing_id.into_inner();
    let detail_page = listing_detail_page(listing_id);
    Ok(
        match repository
            .add_review(user.user_id, listing_id, review.into_inner())
            .await
        {
            Ok(_) => flash::success("Review successfully added!", detail_page),
            Err(err) => flash::error_response(&err, &detail_page),
        },
    )
}

#[api_v2_operation]
pub async fn listing_detail(
    repository: Repository,
    listing_id: web::Path<ListingId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match repository.get_listing_detail(listing_id.into_inner()).await {
            Ok(detail) => HttpResponse::Ok().json(detail),
            Err(err) => flash::error_response(&err, "/"),
        },
    )
}

#[api_v2_operation]
/// Case insensitive search on book title and author
pub async fn search(
    repository: Repository,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, Error> {
    let query = query.into_inner().q.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Ok(HttpResponse::BadRequest().json(Flash::new(
            FlashCategory::Warning,
            "Please enter a valid search term.",
            "/",
        )));
    }

    Ok(match repository.search_listings(&query).await {
        Ok(results) => {
            let flash = results.is_empty().then(|| {
                Flash::new(
                    FlashCategory::Info,
                    "No results found for your search.",
                    "/",
                )
            });
            HttpResponse::Ok().json(SearchResults {
                query,
                results,
                flash,
            })
        }
        Err(err) => flash::error_response(&err, "/"),
    })
}

#[api_v2_operation]
pub async fn buy_listing(
    repository: Repository,
    user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
) -> Result<HttpResponse, Error> {
    let listing_id = listing_id.into_inner();
    Ok(
        match repository.buy_listing(user.user_id, listing_id).await {
            Ok(transaction_id) => {
                tracing::info!(
                    "User {} bought listing {} in transaction {}",
                    user.user_id,
                    listing_id,
                    transaction_id
                );
                flash::success("You have successfully purchased this listing!", "/")
            }
            Err(err) => flash::error_response(&err, &listing_detail_page(listing_id)),
        },
    )
}

#[api_v2_operation]
pub async fn my_purchases(
    repository: Repository,
    user: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    Ok(match repository.list_purchases(user.user_id).await {
        Ok(purchases) => HttpResponse::Ok().json(PurchasesResponse { purchases }),
        Err(err) => flash::error_response(&err, "/"),
    })
}

#[api_v2_operation]
pub async fn reserve_listing(
    repository: Repository,
    user: AuthenticatedUser,
    listing_id: web::Path<ListingId>,
) -> Result<HttpResponse, Error> {
    let listing_id = listing_id.into_inner();
    Ok(
        match repository.reserve_listing(user.user_id, listing_id).await {
            Ok(reservation_id) => {
                let mut response = flash::success(
                    "You have successfully reserved this listing!",
                    "/my_reservations",
                );
                if let Ok(location) = format!("/delete_reservation/{}", reservation_id).parse() {
                    response.headers_mut().insert(LOCATION, location);
                }
                response
            }
            Err(err) => flash::error_response(&err, &listing_detail_page(listing_id)),
        },
    )
}

#[api_v2_operation]
pub async fn delete_reservation(
    repository: Repository,
    user: AuthenticatedUser,
    reservation_id: web::Path<ReservationId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match repository
            .delete_reservation(user.user_id, reservation_id.into_inner())
            .await
        {
            Ok(()) => flash::success("Reservation successfully deleted!", "/my_reservations"),
            Err(err) => flash::error_response(&err, "/my_reservations"),
        },
    )
}

#[api_v2_operation]
pub async fn my_reservations(
    repository: Repository,
    user: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    Ok(match repository.list_reservations(user.user_id).await {
        Ok(reservations) => HttpResponse::Ok().json(ReservationsResponse { reservations }),
        Err(err) => flash::error_response(&err, "/"),
    })
}

#[api_v2_operation]
pub async fn buy_reserved_listing(
    repository: Repository,
    user: AuthenticatedUser,
    path: web::Path<ReservedListingPath>,
) -> Result<HttpResponse, Error> {
    let ReservedListingPath {
        listing_id,
        reservation_id,
    } = path.into_inner();
    Ok(
        match repository
            .buy_reserved_listing(user.user_id, listing_id, reservation_id)
            .await
        {
            Ok(_) => flash::success(
                "You have successfully purchased this reserved listing!",
                "/my_purchases",
            ),
            Err(err) => flash::error_response(&err, "/my_reservations"),
        },
    )
}

#[cfg(test)]
mod handler_tests {
    use actix_web::cookie::Cookie;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use base64::Engine;
    use paperclip::actix::OpenApiExt;

    use super::*;
    use crate::api::{
        BookDetails, ListingDetail, ListingPatch, ListingSummary, RegisterRequest,
    };
    use crate::app_config::config_app;
    use crate::image_storage::InMemoryImageStorage;
    use crate::marketplace_repository::InMemoryMarketplaceRepository;

    struct TestContext {
        repository: Arc<InMemoryMarketplaceRepository>,
        storage: Arc<InMemoryImageStorage>,
        sessions: Data<SessionStore>,
    }

    impl TestContext {
        fn new() -> Self {
            Self {
                repository: Arc::new(InMemoryMarketplaceRepository::default()),
                storage: Arc::new(InMemoryImageStorage::default()),
                sessions: Data::new(SessionStore::default()),
            }
        }

        /// Registers user directly in the repository and returns a logged in session cookie
        async fn logged_in(&self, name: &str) -> (i32, Cookie<'static>) {
            let user_id = self
                .repository
                .register_user(NewUser {
                    name: name.to_string(),
                    email: format!("{}@example.com", name),
                    password_hash: hash_password("secret").unwrap(),
                    phone_number: None,
                })
                .await
                .unwrap();
            let token = self.sessions.create(user_id);
            (user_id, Cookie::new(SESSION_COOKIE, token))
        }
    }

    macro_rules! init_app {
        ($ctx:expr) => {
            test::init_service(
                App::new()
                    .wrap_api()
                    .app_data(Data::new(
                        $ctx.repository.clone() as Arc<dyn MarketplaceRepository>
                    ))
                    .app_data(Data::new($ctx.storage.clone() as Arc<dyn ImageStorage>))
                    .app_data($ctx.sessions.clone())
                    .app_data(Data::new(WebSettings {
                        max_upload_bytes: 1024,
                        secure_cookies: false,
                    }))
                    .configure(config_app)
                    .build(),
            )
            .await
        };
    }

    fn listing_request(title: &str, image: Option<ImageUpload>) -> NewListingRequest {
        NewListingRequest {
            book: BookDetails {
                title: title.to_string(),
                author: "Tolkien".to_string(),
                isbn: format!("isbn-{}", title),
                year: Some(1954),
                description: None,
            },
            price_cents: 1200,
            condition: "Used".to_string(),
            image,
        }
    }

    fn png(filename: &str) -> ImageUpload {
        ImageUpload {
            filename: filename.to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(b"png-data"),
        }
    }

    fn location_listing_id<B>(response: &actix_web::dev::ServiceResponse<B>) -> ListingId {
        response
            .headers()
            .get(LOCATION)
            .expect("location header")
            .to_str()
            .unwrap()
            .strip_prefix("/listing_detail/")
            .unwrap()
            .parse()
            .unwrap()
    }

    #[actix_web::test]
    /// 1. Registers a user, second registration with same data reports both conflicts
    /// 2. Login with wrong password fails, correct one sets session cookie
    /// 3. Session cookie gives access to protected routes, logout drops it
    async fn test_register_login_logout() {
        let ctx = TestContext::new();
        let app = init_app!(ctx);

        let register = RegisterRequest {
            name: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "secret".to_string(),
            phone_number: None,
        };
        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/register")
                .set_json(&register)
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let flash: Flash = test::read_body_json(response).await;
        assert_eq!(flash.redirect_to, "/login");

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/register")
                .set_json(&register)
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let errors: RegistrationErrors = test::read_body_json(response).await;
        assert!(errors.name_error.is_some());
        assert!(errors.email_error.is_some());

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/login")
                .set_json(&LoginRequest {
                    email: "alice@example.com".to_string(),
                    password: "wrong".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/login")
                .set_json(&LoginRequest {
                    email: "alice@example.com".to_string(),
                    password: "secret".to_string(),
                })
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .response()
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .expect("session cookie")
            .into_owned();
        assert!(cookie.http_only().unwrap_or_default());

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/my_listings")
                .cookie(cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/logout")
                .cookie(cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/my_listings")
                .cookie(cookie)
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let flash: Flash = test::read_body_json(response).await;
        assert_eq!(flash.redirect_to, "/login");
    }

    #[actix_web::test]
    /// 1. Adds listing with image, unsupported image is skipped
    /// 2. Edit replaces the image and removes the old one from storage
    /// 3. Delete removes listing and its image
    async fn test_listing_management_with_images() {
        let ctx = TestContext::new();
        let app = init_app!(ctx);
        let (seller, seller_cookie) = ctx.logged_in("seller").await;

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/add_listing")
                .cookie(seller_cookie.clone())
                .set_json(&listing_request("Hobbit", Some(png("cover.png"))))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let listing_id = location_listing_id(&response);
        assert_eq!(ctx.storage.len(), 1);

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/add_listing")
                .cookie(seller_cookie.clone())
                .set_json(&listing_request("Silmarillion", Some(png("notes.txt"))))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let skipped_image_listing = location_listing_id(&response);
        assert_eq!(ctx.storage.len(), 1);

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/listing_detail/{}", skipped_image_listing))
                .to_request(),
        )
        .await;
        let detail: ListingDetail = test::read_body_json(response).await;
        assert!(detail.image_urls.is_empty());

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/listing_detail/{}", listing_id))
                .to_request(),
        )
        .await;
        let detail: ListingDetail = test::read_body_json(response).await;
        assert_eq!(detail.listing.owner_id, seller);
        assert_eq!(detail.seller_name, "seller");
        let original_image = detail.image_urls[0].clone();

        let edit = EditListingRequest {
            changes: ListingPatch {
                price_cents: Some(900),
                ..ListingPatch::default()
            },
            image: Some(png("back.png")),
        };
        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/edit_listings/{}", listing_id))
                .cookie(seller_cookie.clone())
                .set_json(&edit)
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!ctx.storage.contains(&original_image));
        assert_eq!(ctx.storage.len(), 1);

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/edit_listings/{}", listing_id))
                .cookie(seller_cookie.clone())
                .to_request(),
        )
        .await;
        let detail: ListingDetail = test::read_body_json(response).await;
        assert_eq!(detail.listing.price_cents, 900);
        assert!(detail.image_urls[0].ends_with("_back.png"));

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/delete_listing/{}", listing_id))
                .cookie(seller_cookie)
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let flash: Flash = test::read_body_json(response).await;
        assert_eq!(flash.message, "Listing 'Hobbit' successfully deleted!");
        assert!(ctx.storage.is_empty());
    }

    #[actix_web::test]
    /// Image over the size limit is rejected before anything is stored
    async fn test_oversized_image_is_rejected() {
        let ctx = TestContext::new();
        let app = init_app!(ctx);
        let (_, cookie) = ctx.logged_in("seller").await;

        let image = ImageUpload {
            filename: "huge.jpg".to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(vec![7u8; 2048]),
        };
        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/add_listing")
                .cookie(cookie)
                .set_json(&listing_request("Hobbit", Some(image)))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(ctx.storage.is_empty());
        assert!(ctx
            .repository
            .list_listings_by_status(ListingStatus::Available)
            .await
            .unwrap()
            .is_empty());
    }

    #[actix_web::test]
    /// 1. Owner and strangers get rejected where the lifecycle forbids it
    /// 2. Buyer reserves, cancels, reserves again and buys the reserved listing
    /// 3. Index shows reserved listings only to logged in users
    async fn test_reservation_flow() {
        let ctx = TestContext::new();
        let app = init_app!(ctx);
        let (_, seller_cookie) = ctx.logged_in("seller").await;
        let (_, buyer_cookie) = ctx.logged_in("buyer").await;
        let (_, stranger_cookie) = ctx.logged_in("stranger").await;

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/add_listing")
                .cookie(seller_cookie.clone())
                .set_json(&listing_request("Hobbit", None))
                .to_request(),
        )
        .await;
        let listing_id = location_listing_id(&response);

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/reserve_listing/{}", listing_id))
                .cookie(seller_cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let flash: Flash = test::read_body_json(response).await;
        assert_eq!(flash.message, "You cannot reserve your own listing.");
        assert_eq!(flash.redirect_to, format!("/listing_detail/{}", listing_id));

        let reserve = |cookie: Cookie<'static>| {
            test::TestRequest::post()
                .uri(&format!("/reserve_listing/{}", listing_id))
                .cookie(cookie)
                .to_request()
        };
        let response = test::call_service(&app, reserve(buyer_cookie.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let reservation_id: ReservationId = response
            .headers()
            .get(LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .strip_prefix("/delete_reservation/")
            .unwrap()
            .parse()
            .unwrap();

        let response = test::call_service(&app, reserve(stranger_cookie.clone())).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/").to_request(),
        )
        .await;
        let page: serde_json::Value = test::read_body_json(response).await;
        assert!(page.get("reserved_listings").is_none());
        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/")
                .cookie(stranger_cookie.clone())
                .to_request(),
        )
        .await;
        let page: IndexPage = test::read_body_json(response).await;
        assert_eq!(page.reserved_listings.map(|listings| listings.len()), Some(1));
        assert!(page.available_listings.is_empty());

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/delete_reservation/{}", reservation_id))
                .cookie(stranger_cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/delete_reservation/{}", reservation_id))
                .cookie(buyer_cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = test::call_service(&app, reserve(buyer_cookie.clone())).await;
        let reservation_id: ReservationId = response
            .headers()
            .get(LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .strip_prefix("/delete_reservation/")
            .unwrap()
            .parse()
            .unwrap();

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!(
                    "/buy_reserved_listing/{}/{}",
                    listing_id, reservation_id
                ))
                .cookie(buyer_cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let flash: Flash = test::read_body_json(response).await;
        assert_eq!(flash.redirect_to, "/my_purchases");

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/my_purchases")
                .cookie(buyer_cookie.clone())
                .to_request(),
        )
        .await;
        let purchases: PurchasesResponse = test::read_body_json(response).await;
        assert_eq!(purchases.purchases.len(), 1);
        assert_eq!(purchases.purchases[0].listing.status, ListingStatus::Sold);

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/my_reservations")
                .cookie(buyer_cookie.clone())
                .to_request(),
        )
        .await;
        let reservations: ReservationsResponse = test::read_body_json(response).await;
        assert!(reservations.reservations.is_empty());

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/delete_listing/{}", listing_id))
                .cookie(seller_cookie)
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    /// Favorites, reviews and search through the http layer
    async fn test_favorites_reviews_and_search() {
        let ctx = TestContext::new();
        let app = init_app!(ctx);
        let (_, seller_cookie) = ctx.logged_in("seller").await;
        let (_, buyer_cookie) = ctx.logged_in("buyer").await;

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/add_listing")
                .cookie(seller_cookie)
                .set_json(&listing_request("Hobbit", None))
                .to_request(),
        )
        .await;
        let listing_id = location_listing_id(&response);

        let favorite = || {
            test::TestRequest::post()
                .uri(&format!("/add_to_favorites/{}", listing_id))
                .cookie(buyer_cookie.clone())
                .to_request()
        };
        let response = test::call_service(&app, favorite()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = test::call_service(&app, favorite()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let flash: Flash = test::read_body_json(response).await;
        assert_eq!(flash.category, FlashCategory::Warning);
        assert_eq!(flash.message, "Listing is already in favorites!");
        assert_eq!(flash.redirect_to, "/my_favorites");

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/add_to_favorites/{}", listing_id + 100))
                .cookie(buyer_cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let flash: Flash = test::read_body_json(response).await;
        assert_eq!(
            flash.redirect_to,
            format!("/listing_detail/{}", listing_id + 100)
        );

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/my_favorites")
                .cookie(buyer_cookie.clone())
                .to_request(),
        )
        .await;
        let favorites: ListingsResponse = test::read_body_json(response).await;
        assert_eq!(
            favorites
                .listings
                .iter()
                .map(|listing: &ListingSummary| listing.listing_id)
                .collect::<Vec<_>>(),
            vec![listing_id]
        );

        let remove = || {
            test::TestRequest::post()
                .uri(&format!("/remove_from_favorites/{}", listing_id))
                .cookie(buyer_cookie.clone())
                .to_request()
        };
        assert_eq!(
            test::call_service(&app, remove()).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            test::call_service(&app, remove()).await.status(),
            StatusCode::NOT_FOUND
        );

        let review = |rating| {
            test::TestRequest::post()
                .uri(&format!("/add_review/{}", listing_id))
                .cookie(buyer_cookie.clone())
                .set_json(&NewReviewRequest {
                    rating,
                    comment: "Lovely copy".to_string(),
                })
                .to_request()
        };
        assert_eq!(
            test::call_service(&app, review(9)).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            test::call_service(&app, review(4)).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            test::call_service(&app, review(5)).await.status(),
            StatusCode::CONFLICT
        );

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/add_review/{}", listing_id))
                .cookie(buyer_cookie.clone())
                .to_request(),
        )
        .await;
        let detail: ListingDetail = test::read_body_json(response).await;
        assert_eq!(detail.reviews.len(), 1);
        assert_eq!(detail.reviews[0].reviewer_name, "buyer");

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/search?q=hOBB").to_request(),
        )
        .await;
        let results: SearchResults = test::read_body_json(response).await;
        assert_eq!(results.results.len(), 1);
        assert!(results.flash.is_none());

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/search?q=dune").to_request(),
        )
        .await;
        let results: SearchResults = test::read_body_json(response).await;
        assert!(results.results.is_empty());
        assert_eq!(
            results.flash.map(|flash| flash.category),
            Some(FlashCategory::Info)
        );

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/search?q=%20").to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/buy_listing/{}", listing_id))
                .cookie(buyer_cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = test::call_service(&app, favorite()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let flash: Flash = test::read_body_json(response).await;
        assert_eq!(flash.message, "You cannot add a sold listing to your favorites.");
    }
}
