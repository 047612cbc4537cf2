//! Filesystem blob store

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::render::{BlobStore, RenderError, RenderResult};

/// Serves source refs relative to a root directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Map a ref to a path under the root; refs escaping the root do not exist
    fn resolve(&self, source_ref: &str) -> RenderResult<PathBuf> {
        let relative = Path::new(source_ref.trim_start_matches('/'));
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        if !contained || source_ref.is_empty() {
            return Err(RenderError::NotFound(format!("Source {} not found", source_ref)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn download(&self, source_ref: &str, dest: &Path) -> RenderResult<u64> {
        let path = self.resolve(source_ref)?;
        let bytes = tokio::fs::copy(&path, dest).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                RenderError::NotFound(format!("Source {} not found", source_ref))
            }
            _ => RenderError::Io(format!("Failed to copy {}: {}", path.display(), e)),
        })?;

        tracing::debug!(source_ref, bytes, "Copied source from local storage");
        Ok(bytes)
    }
}
