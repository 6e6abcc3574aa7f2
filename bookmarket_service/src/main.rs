use std::sync::Arc;

use actix_web::{App, HttpServer};
use anyhow::Context;
use paperclip::actix::{web, OpenApiExt};
use tracing_actix_web::TracingLogger;

use bookmarket_service::app_config::{config_app, WebSettings};
use bookmarket_service::image_storage::{
    ImageStorage, InMemoryImageStorage, SupabaseImageStorage, SupabaseImageStorageConfig,
};
use bookmarket_service::marketplace_repository::{
    InMemoryMarketplaceRepository, MarketplaceRepository, PostgresMarketplaceRepository,
    PostgresMarketplaceRepositoryConfig,
};
use bookmarket_service::sessions::SessionStore;
use bookmarket_service::settings::Settings;
use bookmarket_service::telemetry::init_telemetry;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("bookmarket_service")?;
    let settings = Settings::load()?;

    let marketplace_repository: Arc<dyn MarketplaceRepository> = if settings.use_in_memory_db {
        tracing::warn!("Using in memory marketplace repository, data is lost on restart");
        Arc::new(InMemoryMarketplaceRepository::default())
    } else {
        Arc::new(
            PostgresMarketplaceRepository::init(PostgresMarketplaceRepositoryConfig {
                hostname: settings.db_host.clone(),
                username: settings.db_username.clone(),
                password: settings.db_password.clone(),
            })
            .await
            .context("Failed to init postgres")?,
        )
    };

    let image_storage: Arc<dyn ImageStorage> = if settings.use_in_memory_storage {
        tracing::warn!("Using in memory image storage");
        Arc::new(InMemoryImageStorage::default())
    } else {
        Arc::new(SupabaseImageStorage::new(SupabaseImageStorageConfig {
            url: settings.storage_url.clone(),
            api_key: settings.storage_api_key.clone(),
            bucket: settings.storage_bucket.clone(),
        })?)
    };

    let sessions = web::Data::new(SessionStore::default());
    let web_settings = WebSettings::from(&settings);

    tracing::info!(
        "Starting HTTP server at http://{}:{}",
        settings.bind_address,
        settings.port
    );
    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(web::Data::new(marketplace_repository.clone()))
            .app_data(web::Data::new(image_storage.clone()))
            .app_data(sessions.clone())
            .app_data(web::Data::new(web_settings))
            .app_data(actix_web::web::JsonConfig::default().limit(web_settings.json_limit()))
            .wrap(TracingLogger::default())
            .configure(config_app)
            .with_json_spec_at("/apispec/v2")
            .build()
    })
    .bind((settings.bind_address.as_str(), settings.port))?
    .run()
    .await
    .context("HTTP server failed")
}
