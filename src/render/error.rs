//! Render error types
//!
//! One taxonomy shared by the cache, the converter and the collaborators.
//! Errors are `Clone` because a single failed conversion is delivered to
//! every caller waiting on it.

use thiserror::Error;

/// Page rendering error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// Document or its source file is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested page lies outside the document
    #[error("Page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    /// External converter failed or produced no usable output
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Filesystem or network failure while materializing a source
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => RenderError::NotFound(err.to_string()),
            _ => RenderError::Io(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for RenderError {
    fn from(err: sqlx::Error) -> Self {
        RenderError::Io(format!("metadata store: {}", err))
    }
}

/// Result type alias for render operations
pub type RenderResult<T> = std::result::Result<T, RenderError>;
