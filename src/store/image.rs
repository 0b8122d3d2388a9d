use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::{ImageStore, LaptopStore};
use crate::{Error, Result};

/// Metadata recorded for an uploaded image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    /// Laptop the image belongs to.
    pub laptop_id: String,
    /// File extension supplied by the uploader, such as `.jpg`.
    pub image_type: String,
    /// Where the bytes were written.
    pub path: PathBuf,
}

/// Longest accepted image type, including the leading dot.
pub const MAX_IMAGE_TYPE_LEN: usize = 16;

/// Checks that `image_type` is empty or a plain extension such as `.jpg`.
///
/// The type becomes part of the stored file name, so anything that could
/// leave the image folder is rejected.
pub fn validate_image_type(image_type: &str) -> Result<()> {
    if image_type.len() > MAX_IMAGE_TYPE_LEN {
        return Err(Error::InvalidArgument("image type too long".to_string()));
    }

    let valid = image_type.is_empty()
        || image_type
            .strip_prefix('.')
            .is_some_and(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    if !valid {
        return Err(Error::InvalidArgument(format!(
            "image type '{image_type}' must look like '.jpg'"
        )));
    }

    Ok(())
}

/// Writes image bytes under a folder and keeps their metadata in memory.
#[derive(Clone)]
pub struct DiskImageStore {
    folder: PathBuf,
    laptops: Arc<dyn LaptopStore>,
    images: Arc<RwLock<HashMap<String, ImageInfo>>>,
}

impl DiskImageStore {
    /// Creates a store writing into `folder`; uploads are checked against `laptops`.
    pub fn new(folder: impl Into<PathBuf>, laptops: Arc<dyn LaptopStore>) -> Self {
        Self {
            folder: folder.into(),
            laptops,
            images: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Folder holding the image files.
    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

#[async_trait]
impl ImageStore for DiskImageStore {
    async fn save(&self, laptop_id: &str, image_type: &str, data: Vec<u8>) -> Result<String> {
        validate_image_type(image_type)?;

        if self.laptops.find(laptop_id).await.is_none() {
            return Err(Error::NotFound(format!("laptop '{laptop_id}'")));
        }

        let image_id = Uuid::new_v4().to_string();
        let path = self.folder.join(format!("{image_id}{image_type}"));

        tokio::fs::create_dir_all(&self.folder).await?;
        tokio::fs::write(&path, &data).await?;

        info!(%image_id, laptop_id, size = data.len(), path = %path.display(), "image written");

        let mut images = self.images.write().await;
        images.insert(
            image_id.clone(),
            ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: image_type.to_string(),
                path,
            },
        );

        Ok(image_id)
    }

    async fn find(&self, image_id: &str) -> Option<ImageInfo> {
        self.images.read().await.get(image_id).cloned()
    }

    async fn count(&self) -> usize {
        self.images.read().await.len()
    }
}
