//! Page service
//!
//! Entry point used by the HTTP layer. Resolves document metadata,
//! validates the page index and funnels every render through the
//! [`RenderCache`], materializing the source once per document.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use super::cache::RenderCache;
use super::error::{RenderError, RenderResult};
use super::source::SourceCache;
use super::traits::{BlobStore, MetadataStore, PageConverter};
use super::types::{file_prefix, CacheStats, ConvertRequest, Document, PageImage, RenderedPage};
use crate::config::RenderConfig;

/// A rendered page loaded into memory
#[derive(Debug, Clone)]
pub struct PageContent {
    pub page: RenderedPage,
    pub bytes: Vec<u8>,
    /// Quoted strong validator derived from the bytes
    pub etag: String,
}

/// Statistics for both caches
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub pages: CacheStats,
    pub sources: CacheStats,
    pub conversion_slots: usize,
}

struct Inner {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    converter: Arc<dyn PageConverter>,
    pages: RenderCache,
    sources: SourceCache,
    permits: Arc<Semaphore>,
    config: RenderConfig,
}

/// Page rendering service
#[derive(Clone)]
pub struct PageService {
    inner: Arc<Inner>,
}

impl PageService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        converter: Arc<dyn PageConverter>,
        config: RenderConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                metadata,
                blobs,
                converter,
                pages: RenderCache::with_capacity(config.max_cached_pages),
                sources: SourceCache::new(config.max_cached_sources),
                permits: Arc::new(Semaphore::new(config.max_concurrent_conversions.max(1))),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.inner.config
    }

    /// Rendered page for `(document_id, page_index)`
    pub async fn get_page(&self, document_id: &str, page_index: u32) -> RenderResult<RenderedPage> {
        let document = self
            .inner
            .metadata
            .get_document(document_id)
            .await?
            .ok_or_else(|| RenderError::NotFound(format!("Material {} not found", document_id)))?;

        if let Some(page_count) = document.page_count {
            check_range(page_index, page_count)?;
        }

        let inner = Arc::clone(&self.inner);
        let ttl = self.inner.config.cache_ttl;
        self.inner
            .pages
            .get_or_compute(
                document_id,
                page_index,
                move || async move { inner.render(document, page_index).await },
                ttl,
            )
            .await
    }

    /// Rendered page bytes with their validator
    ///
    /// A file that disappeared after lookup is invalidated and rendered
    /// again once.
    pub async fn read_page(&self, document_id: &str, page_index: u32) -> RenderResult<PageContent> {
        let mut retried = false;
        loop {
            let page = self.get_page(document_id, page_index).await?;
            match tokio::fs::read(&page.image_location).await {
                Ok(bytes) => {
                    let etag = format!("\"{}\"", compute_hash(&bytes));
                    return Ok(PageContent { page, bytes, etag });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && !retried => {
                    tracing::warn!(
                        material_id = %document_id,
                        page = page_index,
                        path = %page.image_location.display(),
                        "Rendered page vanished, rendering again"
                    );
                    self.inner.pages.invalidate_page(&page);
                    retried = true;
                }
                Err(e) => {
                    return Err(RenderError::Io(format!(
                        "Failed to read {}: {}",
                        page.image_location.display(),
                        e
                    )));
                }
            }
        }
    }

    /// Drop every cached page and the local source of a document
    pub fn evict_document(&self, document_id: &str) -> usize {
        let pages = self.inner.pages.remove_document(document_id);
        let source = self.inner.sources.remove(document_id);
        tracing::debug!(material_id = %document_id, pages, source, "Evicted material from caches");
        pages
    }

    /// Delete a document's metadata and everything cached for it
    pub async fn delete_document(&self, document_id: &str) -> RenderResult<bool> {
        let existed = self.inner.metadata.delete_document(document_id).await?;
        self.evict_document(document_id);
        Ok(existed)
    }

    /// Evict expired pages and sources; returns `(pages, sources)` removed
    pub fn purge_expired(&self) -> (usize, usize) {
        (
            self.inner.pages.purge_expired(),
            self.inner.sources.purge_expired(),
        )
    }

    /// Periodically purge expired entries
    pub fn start_sweep_task(&self) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        let period = self.inner.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let (pages, sources) = service.purge_expired();
                if pages + sources > 0 {
                    tracing::info!(pages, sources, "Swept expired cache entries");
                }
            }
        })
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            pages: self.inner.pages.stats(),
            sources: self.inner.sources.stats(),
            conversion_slots: self.inner.permits.available_permits(),
        }
    }
}

impl Inner {
    /// Materialize the source and convert one page
    async fn render(&self, document: Document, page_index: u32) -> RenderResult<PageImage> {
        let start = StdInstant::now();
        let source = self
            .sources
            .materialize(
                &document,
                Arc::clone(&self.blobs),
                Arc::clone(&self.converter),
                self.config.files_dir.clone(),
                self.config.cache_ttl,
            )
            .await?;

        if document.page_count != Some(source.page_count) {
            if let Err(e) = self
                .metadata
                .record_page_count(&document.id, source.page_count)
                .await
            {
                tracing::warn!(material_id = %document.id, error = %e, "Failed to record page count");
            }
        }
        check_range(page_index, source.page_count)?;

        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RenderError::Conversion("converter pool closed".into()))?;

        tokio::fs::create_dir_all(&self.config.images_dir).await?;
        let request = ConvertRequest {
            source: source.path().to_path_buf(),
            page_index,
            output_dir: self.config.images_dir.clone(),
            prefix: file_prefix(&document.id),
            scale: self.config.raster_scale,
            format: self.config.image_format,
        };

        let timeout = self.config.convert_timeout;
        let path = match tokio::time::timeout(timeout, self.converter.convert_page(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RenderError::Conversion(format!(
                    "conversion of page {} timed out after {}s",
                    page_index,
                    timeout.as_secs()
                )))
            }
        };

        let (width, height) = probe_dimensions(path.clone()).await?;

        tracing::info!(
            material_id = %document.id,
            page = page_index,
            width,
            height,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rendered page"
        );

        Ok(PageImage {
            path,
            format: self.config.image_format,
            width,
            height,
        })
    }
}

fn check_range(page_index: u32, page_count: u32) -> RenderResult<()> {
    if page_index == 0 || page_index > page_count {
        return Err(RenderError::PageOutOfRange {
            page: page_index,
            page_count,
        });
    }
    Ok(())
}

/// Read the image header; undecodable output is deleted
async fn probe_dimensions(path: PathBuf) -> RenderResult<(u32, u32)> {
    let probe = path.clone();
    let dims = tokio::task::spawn_blocking(move || image::image_dimensions(&probe))
        .await
        .map_err(|e| RenderError::Conversion(format!("Task join error: {}", e)))?;

    match dims {
        Ok(dims) => Ok(dims),
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %remove_err, "Failed to remove unreadable output");
            }
            Err(RenderError::Conversion(format!(
                "converter produced an unreadable image at {}: {}",
                path.display(),
                e
            )))
        }
    }
}

/// SHA-256 hex digest
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{MemoryBlobStore, MemoryMetadataStore, MockConverter};
    use crate::render::types::SourceFormat;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct Fixture {
        service: PageService,
        metadata: Arc<MemoryMetadataStore>,
        blobs: Arc<MemoryBlobStore>,
        converter: Arc<MockConverter>,
        dir: TempDir,
    }

    fn test_config(dir: &Path) -> RenderConfig {
        RenderConfig {
            files_dir: dir.join("files"),
            images_dir: dir.join("images"),
            ..RenderConfig::default()
        }
    }

    fn fixture_with(converter: MockConverter, config: impl FnOnce(&Path) -> RenderConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MemoryMetadataStore::new());
        metadata.insert(Document::new("D1", "uploads/D1.pdf", SourceFormat::Pdf).with_page_count(3));
        metadata.insert(Document::new("D2", "uploads/D2.pdf", SourceFormat::Pdf));
        metadata.insert(Document::new("D3", "uploads/D3.docx", SourceFormat::Docx));

        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.insert("uploads/D1.pdf", b"%PDF-1.7 D1".to_vec());
        blobs.insert("uploads/D2.pdf", b"%PDF-1.7 D2".to_vec());
        blobs.insert("uploads/D3.docx", b"PK D3".to_vec());

        let converter = Arc::new(converter);
        let service = PageService::new(
            metadata.clone(),
            blobs.clone(),
            converter.clone(),
            config(dir.path()),
        );

        Fixture {
            service,
            metadata,
            blobs,
            converter,
            dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockConverter::new(3), test_config)
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let f = fixture();

        let first = f.service.get_page("D1", 2).await.unwrap();
        let second = f.service.get_page("D1", 2).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.converter.convert_count(), 1);
        assert_eq!(f.service.stats().pages.hits, 1);
    }

    #[tokio::test]
    async fn test_example_scenario() {
        let f = fixture();
        let images = f.dir.path().join("images");

        let page = f.service.get_page("D1", 2).await.unwrap();
        assert_eq!(page.image_location, images.join("D1_page2.png"));
        assert_eq!((page.width, page.height), (6, 8));

        let requests = f.converter.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].page_index, 2);
        assert_eq!(requests[0].scale, 2048);
        assert_eq!(requests[0].prefix, "D1");
        assert!(requests[0].source.starts_with(f.dir.path().join("files")));

        let again = f.service.get_page("D1", 2).await.unwrap();
        assert_eq!(again.image_location, images.join("D1_page2.png"));
        assert_eq!(f.converter.convert_count(), 1);

        let err = f.service.get_page("D1", 4).await.unwrap_err();
        assert_eq!(err, RenderError::PageOutOfRange { page: 4, page_count: 3 });
        assert_eq!(f.converter.convert_count(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_skips_converter() {
        let f = fixture();

        for page in [0, 4, 100] {
            let err = f.service.get_page("D1", page).await.unwrap_err();
            assert!(matches!(err, RenderError::PageOutOfRange { page_count: 3, .. }));
        }
        assert_eq!(f.converter.convert_count(), 0);
        assert_eq!(f.blobs.download_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let f = fixture();
        let err = f.service.get_page("missing", 1).await.unwrap_err();
        assert!(matches!(err, RenderError::NotFound(_)));
        assert_eq!(f.converter.convert_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_conversion() {
        let gate = Arc::new(Notify::new());
        let f = fixture_with(MockConverter::gated(3, gate.clone()), test_config);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = f.service.clone();
            handles.push(tokio::spawn(async move { service.get_page("D1", 1).await }));
        }

        while f.service.stats().pages.coalesced < 7 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(f.converter.convert_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_failure() {
        let gate = Arc::new(Notify::new());
        let f = fixture_with(MockConverter::gated(3, gate.clone()), test_config);
        f.converter.fail_next(1);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let service = f.service.clone();
            handles.push(tokio::spawn(async move { service.get_page("D1", 1).await }));
        }

        while f.service.stats().pages.coalesced < 4 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            assert_eq!(
                handle.await.unwrap().unwrap_err(),
                RenderError::Conversion("pdftoppm exited with status 1".into())
            );
        }
        assert_eq!(f.converter.convert_count(), 1);
        let stats = f.service.stats().pages;
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.entries, 0);

        // The failure was not stored; the next request converts again.
        gate.notify_one();
        assert!(f.service.get_page("D1", 1).await.is_ok());
        assert_eq!(f.converter.convert_count(), 2);
    }

    #[tokio::test]
    async fn test_independent_pages_each_convert() {
        let f = fixture();

        let (one, two) = tokio::join!(f.service.get_page("D1", 1), f.service.get_page("D1", 2));

        assert_ne!(one.unwrap().image_location, two.unwrap().image_location);
        assert_eq!(f.converter.convert_count(), 2);
        assert_eq!(f.blobs.download_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_retried_on_next_request() {
        let f = fixture();
        f.converter.fail_next(1);

        let err = f.service.get_page("D1", 1).await.unwrap_err();
        assert!(matches!(err, RenderError::Conversion(_)));

        let page = f.service.get_page("D1", 1).await.unwrap();
        assert_eq!(page.page_index, 1);
        assert_eq!(f.converter.convert_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_page_count_is_checked_after_materializing() {
        let f = fixture();

        let err = f.service.get_page("D2", 7).await.unwrap_err();
        assert_eq!(err, RenderError::PageOutOfRange { page: 7, page_count: 3 });
        assert_eq!(f.converter.convert_count(), 0);
        assert_eq!(f.metadata.recorded(), vec![("D2".to_string(), 3)]);

        // The stored count now rejects without touching the source.
        let downloads = f.blobs.download_count();
        let err = f.service.get_page("D2", 9).await.unwrap_err();
        assert!(matches!(err, RenderError::PageOutOfRange { .. }));
        assert_eq!(f.blobs.download_count(), downloads);

        assert!(f.service.get_page("D2", 3).await.is_ok());
    }

    #[tokio::test]
    async fn test_docx_is_normalized_once_per_document() {
        let f = fixture();

        f.service.get_page("D3", 1).await.unwrap();
        f.service.get_page("D3", 2).await.unwrap();

        assert_eq!(f.converter.normalize_count(), 1);
        assert_eq!(f.converter.convert_count(), 2);
        assert!(f.converter.requests()[0]
            .source
            .extension()
            .is_some_and(|ext| ext == "pdf"));
    }

    #[tokio::test]
    async fn test_read_page_returns_bytes_and_etag() {
        let f = fixture();

        let content = f.service.read_page("D1", 1).await.unwrap();
        assert_eq!(&content.bytes[..4], b"\x89PNG");
        assert_eq!(content.etag, format!("\"{}\"", compute_hash(&content.bytes)));
        assert_eq!(content.page.content_type(), "image/png");
    }

    #[tokio::test]
    async fn test_read_page_rerenders_vanished_file() {
        let f = fixture();

        let page = f.service.get_page("D1", 1).await.unwrap();
        std::fs::remove_file(&page.image_location).unwrap();

        let content = f.service.read_page("D1", 1).await.unwrap();
        assert!(!content.bytes.is_empty());
        assert_eq!(f.converter.convert_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_document_cascades() {
        let f = fixture();
        let page = f.service.get_page("D1", 1).await.unwrap();
        assert!(page.image_location.exists());

        assert!(f.service.delete_document("D1").await.unwrap());
        assert!(!page.image_location.exists());
        assert!(matches!(
            f.service.get_page("D1", 1).await,
            Err(RenderError::NotFound(_))
        ));
        assert!(!f.service.delete_document("D1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_request_still_populates_cache() {
        let gate = Arc::new(Notify::new());
        let f = fixture_with(MockConverter::gated(3, gate.clone()), test_config);

        let request = {
            let service = f.service.clone();
            tokio::spawn(async move { service.get_page("D1", 1).await })
        };
        while f.converter.convert_count() == 0 {
            tokio::task::yield_now().await;
        }
        request.abort();
        let _ = request.await;

        gate.notify_one();
        let page = f.service.get_page("D1", 1).await.unwrap();
        assert_eq!(page.page_index, 1);
        assert_eq!(f.converter.convert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_conversion_times_out() {
        let gate = Arc::new(Notify::new());
        let f = fixture_with(MockConverter::gated(3, gate), |dir| RenderConfig {
            convert_timeout: Duration::from_secs(5),
            ..test_config(dir)
        });

        let err = f.service.get_page("D1", 1).await.unwrap_err();
        assert!(matches!(err, RenderError::Conversion(ref msg) if msg.contains("timed out")));
        assert_eq!(f.service.stats().conversion_slots, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_pages_are_rendered_again() {
        let f = fixture_with(MockConverter::new(3), |dir| RenderConfig {
            cache_ttl: Duration::from_secs(60),
            ..test_config(dir)
        });

        f.service.get_page("D1", 1).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(f.service.purge_expired(), (1, 1));

        f.service.get_page("D1", 1).await.unwrap();
        assert_eq!(f.converter.convert_count(), 2);
        assert_eq!(f.blobs.download_count(), 2);
    }
}
