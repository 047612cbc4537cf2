//! Local copies of source documents
//!
//! Pages of one document share a single download. The local PDF is held
//! as an `Arc<LocalSource>`; the file is deleted when the memo entry and
//! every conversion using it have let go.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant as StdInstant;

use tempfile::TempPath;
use tokio::time::Duration;

use super::error::{RenderError, RenderResult};
use super::flight::FlightMap;
use super::traits::{BlobStore, PageConverter};
use super::types::{file_prefix, CacheStats, Document, SourceFormat};

/// Default number of materialized documents kept around
pub const DEFAULT_SOURCE_CAPACITY: usize = 32;

/// A source document available as a local PDF
#[derive(Debug)]
pub struct LocalSource {
    path: TempPath,
    /// Page count probed from the local PDF
    pub page_count: u32,
}

impl LocalSource {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Per-document memo of materialized sources
#[derive(Clone)]
pub struct SourceCache {
    sources: FlightMap<String, Arc<LocalSource>>,
}

impl Default for SourceCache {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_CAPACITY)
    }
}

impl SourceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            sources: FlightMap::new(capacity),
        }
    }

    /// Local copy of `document`, downloading it at most once per TTL window
    pub async fn materialize(
        &self,
        document: &Document,
        blobs: Arc<dyn BlobStore>,
        converter: Arc<dyn PageConverter>,
        files_dir: PathBuf,
        ttl: Duration,
    ) -> RenderResult<Arc<LocalSource>> {
        let doc = document.clone();
        let memo = self
            .sources
            .get_or_compute(document.id.clone(), ttl, move || async move {
                fetch_source(&doc, blobs.as_ref(), converter.as_ref(), &files_dir)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(memo.value)
    }

    /// Forget the local copy of a document
    pub fn remove(&self, document_id: &str) -> bool {
        self.sources.remove_where(|key| key == document_id) > 0
    }

    pub fn purge_expired(&self) -> usize {
        self.sources.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        self.sources.stats()
    }
}

/// Download a document and turn it into a local PDF with a known page count
async fn fetch_source(
    document: &Document,
    blobs: &dyn BlobStore,
    converter: &dyn PageConverter,
    files_dir: &Path,
) -> RenderResult<LocalSource> {
    let start = StdInstant::now();
    tokio::fs::create_dir_all(files_dir).await?;

    let download = tempfile::Builder::new()
        .prefix(&format!("{}_", file_prefix(&document.id)))
        .suffix(document.format.extension())
        .tempfile_in(files_dir)
        .map_err(|e| RenderError::Io(format!("Failed to create temp file: {}", e)))?
        .into_temp_path();

    let bytes = blobs.download(&document.source_ref, &download).await?;

    let path = match document.format {
        SourceFormat::Pdf => download,
        SourceFormat::Docx => {
            let pdf = converter.normalize_to_pdf(&download, files_dir).await?;
            tracing::debug!(material_id = %document.id, pdf = %pdf.display(), "Normalized DOCX to PDF");
            TempPath::from_path(pdf)
        }
    };

    let page_count = converter.page_count(&path).await?;
    if page_count == 0 {
        return Err(RenderError::Conversion(format!(
            "document {} has no pages",
            document.id
        )));
    }

    tracing::info!(
        material_id = %document.id,
        bytes,
        page_count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Materialized source document"
    );

    Ok(LocalSource { path, page_count })
}
