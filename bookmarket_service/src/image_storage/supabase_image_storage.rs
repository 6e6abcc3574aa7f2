use anyhow::{bail, Context};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde::Serialize;

use crate::image_storage::{object_path, ImageStorage, UPLOADS_FOLDER};

pub struct SupabaseImageStorageConfig {
    /// Project url, e.g. https://<project>.supabase.co
    pub url: String,
    pub api_key: String,
    pub bucket: String,
}

/// Stores images through the Supabase storage REST api
pub struct SupabaseImageStorage {
    config: SupabaseImageStorageConfig,
    client: ClientWithMiddleware,
}

#[derive(Serialize)]
struct RemoveObjectsRequest {
    prefixes: Vec<String>,
}

impl SupabaseImageStorage {
    pub fn new(config: SupabaseImageStorageConfig) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();
        let config = SupabaseImageStorageConfig {
            url: config.url.trim_end_matches('/').to_string(),
            ..config
        };
        Ok(Self { config, client })
    }

    fn public_url(&self, filename: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}/{}",
            self.config.url, self.config.bucket, UPLOADS_FOLDER, filename
        )
    }
}

#[async_trait::async_trait]
impl ImageStorage for SupabaseImageStorage {
    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!(
                "{}/storage/v1/object/{}/{}/{}",
                self.config.url, self.config.bucket, UPLOADS_FOLDER, filename
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header("apikey", &self.config.api_key)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .context("Failed to send image to storage")?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            bail!("Failed to upload image {} ({}): {}", filename, status, error)
        }

        tracing::info!("Uploaded image {}", filename);
        Ok(self.public_url(filename))
    }

    async fn remove(&self, public_url: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(format!(
                "{}/storage/v1/object/{}",
                self.config.url, self.config.bucket
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header("apikey", &self.config.api_key)
            .json(&RemoveObjectsRequest {
                prefixes: vec![object_path(public_url)],
            })
            .send()
            .await
            .context("Failed to send image removal to storage")?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            bail!("Failed to remove image {} ({}): {}", public_url, status, error)
        }
        Ok(())
    }
}
