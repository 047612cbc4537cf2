//! In-memory collaborators for tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::error::{RenderError, RenderResult};
use super::traits::{BlobStore, MetadataStore, PageConverter};
use super::types::{ConvertRequest, Document, ImageFormat};

/// Blob store backed by a map of refs to bytes
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    downloads: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source_ref: &str, bytes: Vec<u8>) {
        self.objects.lock().insert(source_ref.to_string(), bytes);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn download(&self, source_ref: &str, dest: &Path) -> RenderResult<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .objects
            .lock()
            .get(source_ref)
            .cloned()
            .ok_or_else(|| RenderError::NotFound(format!("blob {}", source_ref)))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

/// Metadata store backed by a map
#[derive(Default)]
pub struct MemoryMetadataStore {
    documents: Mutex<HashMap<String, Document>>,
    recorded: Mutex<Vec<(String, u32)>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: Document) {
        self.documents.lock().insert(document.id.clone(), document);
    }

    /// Page counts persisted through `record_page_count`
    pub fn recorded(&self) -> Vec<(String, u32)> {
        self.recorded.lock().clone()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_document(&self, document_id: &str) -> RenderResult<Option<Document>> {
        Ok(self.documents.lock().get(document_id).cloned())
    }

    async fn record_page_count(&self, document_id: &str, page_count: u32) -> RenderResult<()> {
        if let Some(doc) = self.documents.lock().get_mut(document_id) {
            doc.page_count = Some(page_count);
        }
        self.recorded.lock().push((document_id.to_string(), page_count));
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> RenderResult<bool> {
        Ok(self.documents.lock().remove(document_id).is_some())
    }
}

/// Converter that writes small real images and counts its invocations
pub struct MockConverter {
    page_count: u32,
    conversions: AtomicUsize,
    normalizations: AtomicUsize,
    fail_next: AtomicUsize,
    requests: Mutex<Vec<ConvertRequest>>,
    gate: Option<Arc<Notify>>,
}

impl MockConverter {
    pub fn new(page_count: u32) -> Self {
        Self {
            page_count,
            conversions: AtomicUsize::new(0),
            normalizations: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Conversions wait for a `notify_one` on `gate` before writing
    pub fn gated(page_count: u32, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(page_count)
        }
    }

    /// Make the next `n` conversions fail
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn convert_count(&self) -> usize {
        self.conversions.load(Ordering::SeqCst)
    }

    pub fn normalize_count(&self) -> usize {
        self.normalizations.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConvertRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PageConverter for MockConverter {
    async fn page_count(&self, source: &Path) -> RenderResult<u32> {
        if !source.exists() {
            return Err(RenderError::Conversion(format!(
                "missing source {}",
                source.display()
            )));
        }
        Ok(self.page_count)
    }

    async fn convert_page(&self, request: &ConvertRequest) -> RenderResult<PathBuf> {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RenderError::Conversion("pdftoppm exited with status 1".into()));
        }
        if request.page_index == 0 || request.page_index > self.page_count {
            return Err(RenderError::Conversion(format!(
                "page {} exceeds {} pages",
                request.page_index, self.page_count
            )));
        }

        let output = request.output_path();
        let format = match request.format {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        };
        image::RgbImage::new(6, 8)
            .save_with_format(&output, format)
            .map_err(|e| RenderError::Conversion(e.to_string()))?;
        Ok(output)
    }

    async fn normalize_to_pdf(&self, source: &Path, output_dir: &Path) -> RenderResult<PathBuf> {
        self.normalizations.fetch_add(1, Ordering::SeqCst);
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| RenderError::Conversion("source has no file name".into()))?;
        let pdf = output_dir.join(format!("{}.pdf", stem));
        tokio::fs::write(&pdf, b"%PDF-1.7 normalized").await?;
        Ok(pdf)
    }
}
