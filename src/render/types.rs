//! Render data types

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Source document format as stored by the upload layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Pdf,
    Docx,
}

impl SourceFormat {
    /// File extension including the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => ".pdf",
            SourceFormat::Docx => ".docx",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Docx => "docx",
        }
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    /// Accepts bare extensions and MIME types
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" | "application/pdf" => Ok(SourceFormat::Pdf),
            "docx"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Ok(SourceFormat::Docx)
            }
            other => Err(format!("unsupported file type '{}'", other)),
        }
    }
}

/// Raster output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// Extension without the leading dot, as written by the rasterizer
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            other => Err(format!("unsupported image format '{}'", other)),
        }
    }
}

/// Uploaded document metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    /// Locator in the blob store
    pub source_ref: String,
    pub format: SourceFormat,
    /// Unknown until stored at upload or revealed by the first conversion
    pub page_count: Option<u32>,
}

impl Document {
    pub fn new(id: impl Into<String>, source_ref: impl Into<String>, format: SourceFormat) -> Self {
        Self {
            id: id.into(),
            source_ref: source_ref.into(),
            format,
            page_count: None,
        }
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

/// File-name-safe stem for a document id
///
/// Plain ids are used as-is; anything else is replaced by a digest so ids
/// can never introduce path separators.
pub fn file_prefix(document_id: &str) -> String {
    let plain = !document_id.is_empty()
        && document_id.len() <= 64
        && document_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        document_id.to_string()
    } else {
        let digest = Sha256::digest(document_id.as_bytes());
        format!("m{}", hex::encode(&digest[..8]))
    }
}

/// Render cache key (pages are 1-based)
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct PageKey {
    pub document_id: String,
    pub page_index: u32,
}

impl PageKey {
    pub fn new(document_id: &str, page_index: u32) -> Self {
        Self {
            document_id: document_id.to_string(),
            page_index,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.page_index)
    }
}

/// A raster image produced by the converter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// An authoritative cached rendering of one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPage {
    pub document_id: String,
    pub page_index: u32,
    pub image_location: PathBuf,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RenderedPage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Input to a single page conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertRequest {
    /// Local PDF to rasterize
    pub source: PathBuf,
    /// 1-based page index
    pub page_index: u32,
    pub output_dir: PathBuf,
    /// Output basename prefix, normally the document id
    pub prefix: String,
    /// Long-edge size in pixels
    pub scale: u32,
    pub format: ImageFormat,
}

impl ConvertRequest {
    /// Final location of the rendered page
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}_page{}.{}",
            self.prefix,
            self.page_index,
            self.format.extension()
        ))
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that attached to an in-flight job instead of starting one
    pub coalesced: u64,
    pub failures: u64,
    pub evictions: u64,
    pub entries: usize,
    pub in_flight: usize,
    pub capacity: usize,
}
