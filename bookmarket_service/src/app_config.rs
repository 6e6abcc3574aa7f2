use paperclip::actix::web;

use crate::handlers;
use crate::settings::Settings;

/// Request handling options shared with the handlers through app data
#[derive(Debug, Clone, Copy)]
pub struct WebSettings {
    pub max_upload_bytes: usize,
    pub secure_cookies: bool,
}

impl From<&Settings> for WebSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            max_upload_bytes: settings.max_upload_bytes,
            secure_cookies: settings.secure_cookies,
        }
    }
}

impl WebSettings {
    /// Json body limit large enough for a base64 encoded image of the maximum size
    pub fn json_limit(&self) -> usize {
        (self.max_upload_bytes / 3)
            .saturating_mul(4)
            .saturating_add(64 * 1024)
    }
}

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(web::resource("/").route(web::get().to(handlers::index)))
        .service(web::resource("/register").route(web::post().to(handlers::register)))
        .service(web::resource("/login").route(web::post().to(handlers::login)))
        .service(web::resource("/logout").route(web::get().to(handlers::logout)))
        .service(web::resource("/add_listing").route(web::post().to(handlers::add_listing)))
        .service(web::resource("/my_listings").route(web::get().to(handlers::my_listings)))
        .service(
            web::resource("/edit_listings/{listing_id}")
                .route(web::get().to(handlers::get_listing_for_edit))
                .route(web::post().to(handlers::edit_listing)),
        )
        .service(
            web::resource("/delete_listing/{listing_id}")
                .route(web::post().to(handlers::delete_listing)),
        )
        .service(
            web::resource("/add_to_favorites/{listing_id}")
                .route(web::post().to(handlers::add_to_favorites)),
        )
        .service(
            web::resource("/remove_from_favorites/{listing_id}")
                .route(web::post().to(handlers::remove_from_favorites)),
        )
        .service(web::resource("/my_favorites").route(web::get().to(handlers::my_favorites)))
        .service(
            web::resource("/add_review/{listing_id}")
                .route(web::get().to(handlers::get_listing_for_review))
                .route(web::post().to(handlers::add_review)),
        )
        .service(
            web::resource("/listing_detail/{listing_id}")
                .route(web::get().to(handlers::listing_detail)),
        )
        .service(web::resource("/search").route(web::get().to(handlers::search)))
        .service(
            web::resource("/buy_listing/{listing_id}")
                .route(web::post().to(handlers::buy_listing)),
        )
        .service(web::resource("/my_purchases").route(web::get().to(handlers::my_purchases)))
        .service(
            web::resource("/reserve_listing/{listing_id}")
                .route(web::post().to(handlers::reserve_listing)),
        )
        .service(
            web::resource("/delete_reservation/{reservation_id}")
                .route(web::post().to(handlers::delete_reservation)),
        )
        .service(
            web::resource("/my_reservations").route(web::get().to(handlers::my_reservations)),
        )
        .service(
            web::resource("/buy_reserved_listing/{listing_id}/{reservation_id}")
                .route(web::post().to(handlers::buy_reserved_listing)),
        );
}
