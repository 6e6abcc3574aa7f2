pub mod api;

#[cfg(any(feature = "client", test))]
pub mod client;

#[cfg(any(feature = "server", test))]
pub mod app_config;

#[cfg(any(feature = "server", test))]
pub mod auth;

#[cfg(any(feature = "server", test))]
mod flash;

#[cfg(any(feature = "server", test))]
mod handlers;

#[cfg(any(feature = "server", test))]
pub mod image_storage;

#[cfg(any(feature = "server", test))]
pub mod image_upload;

#[cfg(any(feature = "server", test))]
pub mod listing_lifecycle;

#[cfg(any(feature = "server", test))]
pub mod marketplace_repository;

#[cfg(any(feature = "server", test))]
pub mod sessions;

#[cfg(any(feature = "server", test))]
pub mod settings;

#[cfg(any(feature = "server", test))]
pub mod telemetry;
