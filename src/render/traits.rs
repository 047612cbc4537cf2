//! Collaborator traits
//!
//! The page service only talks to its surroundings through these seams,
//! so the composition root decides which backends are wired in.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::RenderResult;
use super::types::{ConvertRequest, Document};

/// Fetches source documents by opaque reference
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Copy the object behind `source_ref` to `dest`, returning the byte count
    ///
    /// Fails with `NotFound` when the object does not exist and `Io` for
    /// transport or filesystem failures.
    async fn download(&self, source_ref: &str, dest: &Path) -> RenderResult<u64>;
}

/// Document metadata lookups
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_document(&self, document_id: &str) -> RenderResult<Option<Document>>;

    /// Persist a page count discovered by conversion
    async fn record_page_count(&self, document_id: &str, page_count: u32) -> RenderResult<()>;

    /// Returns whether the document existed
    async fn delete_document(&self, document_id: &str) -> RenderResult<bool>;
}

/// Turns documents into page rasters
#[async_trait]
pub trait PageConverter: Send + Sync {
    /// Number of pages in a local PDF
    async fn page_count(&self, source: &Path) -> RenderResult<u32>;

    /// Render one page and return the absolute path of the written image
    ///
    /// Writes exactly one file on success and nothing readable at the
    /// final path on failure.
    async fn convert_page(&self, request: &ConvertRequest) -> RenderResult<PathBuf>;

    /// Convert a word-processor document to PDF inside `output_dir`
    async fn normalize_to_pdf(&self, source: &Path, output_dir: &Path) -> RenderResult<PathBuf>;
}
