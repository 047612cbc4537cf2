//! HTTP blob store

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::render::{BlobStore, RenderError, RenderResult};

/// Fetches sources by URL
#[derive(Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("material-page-server/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
        })
    }

    /// Absolute refs are used as-is; relative ones are encoded under the base
    fn url_for(&self, source_ref: &str) -> RenderResult<String> {
        if source_ref.starts_with("http://") || source_ref.starts_with("https://") {
            return Ok(source_ref.to_string());
        }

        let base = self.base_url.as_deref().ok_or_else(|| {
            RenderError::Io(format!("No base URL configured for source {}", source_ref))
        })?;
        let path = source_ref
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!("{}/{}", base, path))
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn download(&self, source_ref: &str, dest: &Path) -> RenderResult<u64> {
        let url = self.url_for(source_ref)?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RenderError::Io(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RenderError::NotFound(format!("Source {} not found", source_ref)));
        }
        if !status.is_success() {
            return Err(RenderError::Io(format!("Fetching {} returned {}", url, status)));
        }

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RenderError::Io(format!("Failed to read {}: {}", url, e)))?;
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(url = %url, bytes, "Downloaded source over HTTP");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tempfile::TempDir;

    async fn serve() -> String {
        let app = Router::new()
            .route("/files/m-1.pdf", get(|| async { "%PDF-1.7 remote" }))
            .route(
                "/files/broken.pdf",
                get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_url_for() {
        let store = HttpBlobStore::new(Some("https://cdn.example.com/".into())).unwrap();
        assert_eq!(
            store.url_for("materials/a b.pdf").unwrap(),
            "https://cdn.example.com/materials/a%20b.pdf"
        );
        assert_eq!(
            store.url_for("http://other.example.com/x.pdf").unwrap(),
            "http://other.example.com/x.pdf"
        );

        let bare = HttpBlobStore::new(None).unwrap();
        assert!(matches!(bare.url_for("x.pdf"), Err(RenderError::Io(_))));
    }

    #[tokio::test]
    async fn test_download_over_http() {
        let base = serve().await;
        let store = HttpBlobStore::new(Some(format!("{}/files", base))).unwrap();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("m-1.pdf");

        assert_eq!(store.download("m-1.pdf", &dest).await.unwrap(), 15);
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7 remote");

        let absolute = HttpBlobStore::new(None).unwrap();
        let dest = dir.path().join("absolute.pdf");
        assert!(absolute
            .download(&format!("{}/files/m-1.pdf", base), &dest)
            .await
            .is_ok());
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn test_http_errors_are_classified() {
        let base = serve().await;
        let store = HttpBlobStore::new(Some(format!("{}/files", base))).unwrap();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.pdf");

        assert!(matches!(
            store.download("missing.pdf", &dest).await,
            Err(RenderError::NotFound(_))
        ));
        assert!(matches!(
            store.download("broken.pdf", &dest).await,
            Err(RenderError::Io(_))
        ));
    }
}
