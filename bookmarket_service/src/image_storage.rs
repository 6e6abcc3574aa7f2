pub use in_memory_image_storage::InMemoryImageStorage;
pub use supabase_image_storage::{SupabaseImageStorage, SupabaseImageStorageConfig};

mod in_memory_image_storage;
mod supabase_image_storage;

/// Folder inside the bucket where listing images are kept
pub const UPLOADS_FOLDER: &str = "uploads";

/// Object storage for listing images
#[async_trait::async_trait]
pub trait ImageStorage: Send + Sync {
    /// Stores the image and returns its public url
    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<String>;

    /// Removes image previously returned by [`ImageStorage::upload`]
    async fn remove(&self, public_url: &str) -> anyhow::Result<()>;
}

/// Object key of an image inside the bucket, taken from the last url segment
pub fn object_path(public_url: &str) -> String {
    let filename = public_url.rsplit('/').next().unwrap_or_default();
    format!("{}/{}", UPLOADS_FOLDER, filename)
}

/// Removes all given images, failures are only logged
pub async fn remove_images_best_effort(storage: &dyn ImageStorage, public_urls: &[String]) {
    for url in public_urls {
        if let Err(err) = storage.remove(url).await {
            tracing::warn!("Failed to remove image {} from storage: {:#}", url, err);
        }
    }
}
