//! Render cache for rendered page images
//!
//! Maps `(document_id, page_index)` to the image written by the converter.
//! Entries expire after their TTL and are bounded by an LRU capacity.
//! Whenever an entry leaves the cache its image file is deleted once the
//! cache lock is released. An expired entry found by a new conversion is
//! deleted before that conversion starts.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::time::Duration;

use super::error::RenderResult;
use super::flight::{EvictHook, FlightMap, Memo};
use super::types::{CacheStats, PageImage, PageKey, RenderedPage};

/// Default number of cached pages
pub const DEFAULT_PAGE_CAPACITY: usize = 1000;

/// Thread-safe render cache with single-flight conversions
#[derive(Clone)]
pub struct RenderCache {
    pages: FlightMap<PageKey, PageImage>,
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PAGE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let on_evict: EvictHook<PageKey, PageImage> =
            Arc::new(|key: &PageKey, image: &PageImage| remove_rendered_file(key, &image.path));

        Self {
            pages: FlightMap::with_evict_hook(capacity, on_evict),
        }
    }

    /// Cached page, absent once `now >= expires_at`
    pub fn get(&self, document_id: &str, page_index: u32) -> Option<RenderedPage> {
        let key = PageKey::new(document_id, page_index);
        self.pages.get(&key).map(|memo| to_rendered(&key, memo))
    }

    /// Store a rendered page, replacing any previous entry for the key
    pub fn put(
        &self,
        document_id: &str,
        page_index: u32,
        image: PageImage,
        ttl: Duration,
    ) -> RenderedPage {
        let key = PageKey::new(document_id, page_index);
        let memo = self.pages.put(key.clone(), image, ttl);
        to_rendered(&key, memo)
    }

    /// Cached page, or the result of the single conversion for this key
    ///
    /// Concurrent callers for the same key share one run of `compute`. A
    /// failed run is reported to all of them and leaves the key absent.
    pub async fn get_or_compute<F, Fut>(
        &self,
        document_id: &str,
        page_index: u32,
        compute: F,
        ttl: Duration,
    ) -> RenderResult<RenderedPage>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RenderResult<PageImage>> + Send + 'static,
    {
        let key = PageKey::new(document_id, page_index);
        let memo = self.pages.get_or_compute(key.clone(), ttl, compute).await?;
        Ok(to_rendered(&key, memo))
    }

    /// Drop `page` only if it is still the cached entry for its key
    pub fn invalidate_page(&self, page: &RenderedPage) -> bool {
        let key = PageKey::new(&page.document_id, page.page_index);
        self.pages
            .remove_if(&key, |memo| memo.created_at == page.created_at)
    }

    /// Drop every page of a document, including conversions in flight
    pub fn remove_document(&self, document_id: &str) -> usize {
        self.pages.remove_where(|key| key.document_id == document_id)
    }

    /// Evict expired pages and delete their files
    pub fn purge_expired(&self) -> usize {
        self.pages.purge_expired()
    }

    #[cfg(test)]
    pub(crate) fn is_rendering(&self, document_id: &str, page_index: u32) -> bool {
        self.pages.is_in_flight(&PageKey::new(document_id, page_index))
    }

    pub fn stats(&self) -> CacheStats {
        self.pages.stats()
    }
}

fn to_rendered(key: &PageKey, memo: Memo<PageImage>) -> RenderedPage {
    RenderedPage {
        document_id: key.document_id.clone(),
        page_index: key.page_index,
        image_location: memo.value.path,
        format: memo.value.format,
        width: memo.value.width,
        height: memo.value.height,
        created_at: memo.created_at,
        expires_at: memo.expires_at,
    }
}

fn remove_rendered_file(key: &PageKey, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(page = %key, path = %path.display(), "Removed rendered page");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(page = %key, path = %path.display(), error = %e, "Failed to remove rendered page");
        }
    }
}
