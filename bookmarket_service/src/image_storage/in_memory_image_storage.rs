use std::collections::HashMap;

use anyhow::bail;
use parking_lot::RwLock;

use crate::image_storage::{object_path, ImageStorage};

const IN_MEMORY_URL_PREFIX: &str = "memory://images";

/// Keeps images in process memory, used for local runs and tests
#[derive(Default)]
pub struct InMemoryImageStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryImageStorage {
    pub fn contains(&self, public_url: &str) -> bool {
        self.objects.read().contains_key(&object_path(public_url))
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait::async_trait]
impl ImageStorage for InMemoryImageStorage {
    async fn upload(
        &self,
        filename: &str,
        _content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<String> {
        let public_url = format!("{}/{}", IN_MEMORY_URL_PREFIX, object_path(filename));
        self.objects.write().insert(object_path(filename), bytes);
        Ok(public_url)
    }

    async fn remove(&self, public_url: &str) -> anyhow::Result<()> {
        if self.objects.write().remove(&object_path(public_url)).is_none() {
            bail!("Image {} not found", public_url)
        }
        Ok(())
    }
}
