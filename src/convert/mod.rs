//! Process-backed page converter
//!
//! Rasterizes PDF pages with Poppler (`pdftoppm`, `pdfinfo`) and turns
//! word-processor documents into PDF with LibreOffice (`soffice`).

mod poppler;
mod process;

pub use poppler::{parse_page_count, PopplerConverter};
