use anyhow::Context;
use serde::Deserialize;

use crate::image_upload::DEFAULT_MAX_UPLOAD_BYTES;

/// Optional settings file read from the working directory, e.g. `bookmarket.toml`
const SETTINGS_FILE: &str = "bookmarket";

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct Settings {
    pub use_in_memory_db: bool,
    pub use_in_memory_storage: bool,
    pub db_host: String,
    pub db_username: String,
    pub db_password: String,
    pub storage_url: String,
    pub storage_api_key: String,
    pub storage_bucket: String,
    pub max_upload_bytes: usize,
    pub bind_address: String,
    pub port: u16,
    pub secure_cookies: bool,
}

impl Settings {
    /// Defaults, then the optional settings file, then environment variables
    pub fn load() -> anyhow::Result<Self> {
        Self::build(config::Environment::default())
    }

    fn build(environment: config::Environment) -> anyhow::Result<Self> {
        config::Config::builder()
            .set_default("use_in_memory_db", false)?
            .set_default("use_in_memory_storage", false)?
            .set_default("db_host", "127.0.0.1")?
            .set_default("db_username", "postgres")?
            .set_default("db_password", "postgres")?
            .set_default("storage_url", "")?
            .set_default("storage_api_key", "")?
            .set_default("storage_bucket", "images")?
            .set_default("max_upload_bytes", DEFAULT_MAX_UPLOAD_BYTES as i64)?
            .set_default("bind_address", "0.0.0.0")?
            .set_default("port", 8080)?
            .set_default("secure_cookies", false)?
            .add_source(config::File::with_name(SETTINGS_FILE).required(false))
            .add_source(environment.try_parsing(true))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }
}
