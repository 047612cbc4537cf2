//! S3-compatible blob store
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    Client,
};
use tokio::io::AsyncWriteExt;

use crate::config::S3Config;
use crate::render::{BlobStore, RenderError, RenderResult};

/// S3-compatible blob store
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "material-page-server",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Self { client, bucket }
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn download(&self, source_ref: &str, dest: &Path) -> RenderResult<u64> {
        let key = source_ref.trim_start_matches('/');
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .is_some_and(|se| se.is_no_such_key())
                    || format!("{:?}", e).contains("404");
                if missing {
                    RenderError::NotFound(format!("Object not found: {}", key))
                } else {
                    RenderError::Io(format!("Failed to get object {}: {}", key, e))
                }
            })?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut bytes = 0u64;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| RenderError::Io(format!("Failed to read object body {}: {}", key, e)))?
        {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(bucket = %self.bucket, key, bytes, "Downloaded source from S3");
        Ok(bytes)
    }
}
