//! Page rendering core
//!
//! Turns `(document_id, page_index)` requests into raster images on disk.
//!
//! # Architecture
//!
//! ```text
//! PageService::get_page
//!   ├─ MetadataStore::get_document      (404 if absent, range check if count known)
//!   └─ RenderCache::get_or_compute      (single flight per page, TTL + LRU)
//!        ├─ SourceCache::materialize    (single flight per document)
//!        │    ├─ BlobStore::download
//!        │    ├─ PageConverter::normalize_to_pdf   (DOCX only)
//!        │    └─ PageConverter::page_count
//!        └─ PageConverter::convert_page
//! ```
//!
//! Failures are never cached; the next request for the key starts over.

mod cache;
mod error;
mod flight;
mod service;
mod source;
mod traits;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{RenderCache, DEFAULT_PAGE_CAPACITY};
pub use error::{RenderError, RenderResult};
pub use flight::{EvictHook, FlightMap, Memo};
pub use service::{compute_hash, PageContent, PageService, ServiceStats};
pub use source::{LocalSource, SourceCache, DEFAULT_SOURCE_CAPACITY};
pub use traits::{BlobStore, MetadataStore, PageConverter};
pub use types::{
    file_prefix, CacheStats, ConvertRequest, Document, ImageFormat, PageImage, PageKey,
    RenderedPage, SourceFormat,
};
