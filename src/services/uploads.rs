use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::body::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Persistence for product images. Returns the public URL of a stored file.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(
        &self,
        file_name: Option<&str>,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> Result<String, ServiceError>;

    /// Best effort; a missing file is not an error.
    async fn remove(&self, url: &str) -> Result<(), ServiceError>;
}

/// Writes images under a local directory that is served at `/uploads`.
pub struct LocalImageStore {
    root: PathBuf,
    max_bytes: usize,
}

impl LocalImageStore {
    pub const PUBLIC_PREFIX: &'static str = "/uploads/";

    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn image_extension(file_name: Option<&str>, content_type: Option<&str>) -> Option<String> {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()));

    from_name.or_else(|| {
        let subtype = content_type?.strip_prefix("image/")?.to_ascii_lowercase();
        ALLOWED_EXTENSIONS
            .contains(&subtype.as_str())
            .then_some(subtype)
    })
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(
        &self,
        file_name: Option<&str>,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> Result<String, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::ValidationError("Image file is empty".into()));
        }
        if bytes.len() > self.max_bytes {
            return Err(ServiceError::ValidationError(format!(
                "Image exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        if let Some(ct) = content_type {
            if !ct.starts_with("image/") {
                return Err(ServiceError::ValidationError(format!(
                    "Unsupported content type: {}",
                    ct
                )));
            }
        }
        let ext = image_extension(file_name, content_type).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Image must be one of: {}",
                ALLOWED_EXTENSIONS.join(", ")
            ))
        })?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ServiceError::InternalError(format!("upload dir: {}", e)))?;

        let stored_name = format!("{}.{}", Uuid::new_v4(), ext);
        tokio::fs::write(self.root.join(&stored_name), &bytes)
            .await
            .map_err(|e| ServiceError::InternalError(format!("write image: {}", e)))?;

        info!(file = %stored_name, size = bytes.len(), "stored product image");
        Ok(format!("{}{}", Self::PUBLIC_PREFIX, stored_name))
    }

    async fn remove(&self, url: &str) -> Result<(), ServiceError> {
        let Some(name) = url.strip_prefix(Self::PUBLIC_PREFIX) else {
            return Ok(());
        };
        // Only plain file names produced by `store` are ever removed.
        if name.contains('/') || name.contains("..") {
            return Ok(());
        }
        match tokio::fs::remove_file(self.root.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(error = %e, url, "failed to remove product image");
                Ok(())
            }
        }
    }
}
