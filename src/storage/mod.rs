//! Blob store clients
//!
//! Source documents live in a local directory, an S3-compatible bucket
//! (MinIO, R2, B2, AWS) or behind plain HTTP.

mod http;
mod local;
mod s3;

pub use http::HttpBlobStore;
pub use local::LocalBlobStore;
pub use s3::S3BlobStore;

use std::sync::Arc;

use crate::config::{StorageConfig, StorageProvider};
use crate::error::{AppError, Result};
use crate::render::BlobStore;

/// Build the blob store selected by configuration
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.provider {
        StorageProvider::Local => {
            tracing::info!("Serving sources from {}", config.root.display());
            Arc::new(LocalBlobStore::new(&config.root))
        }
        StorageProvider::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| AppError::Internal("S3 storage selected without S3 settings".into()))?;
            tracing::info!("S3 endpoint: {}", s3.endpoint);
            tracing::info!("S3 bucket: {}", s3.bucket);
            Arc::new(S3BlobStore::new(s3).await)
        }
        StorageProvider::Http => {
            tracing::info!("Fetching sources over HTTP (base: {:?})", config.base_url);
            Arc::new(HttpBlobStore::new(config.base_url.clone())?)
        }
    };

    Ok(store)
}
