//! Material Page Server Library
//!
//! Renders pages of uploaded documents to images on demand, caching each
//! rendered page for a bounded time. The server binary is in main.rs.
//!
//! # Modules
//!
//! - `render`: Render cache, source memo and page service
//! - `convert`: Poppler/LibreOffice backed page converter
//! - `storage`: Blob store clients (local, S3, HTTP)
//! - `db`: SQLite material metadata
//! - `routes`: HTTP surface

pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod render;
pub mod routes;
pub mod state;
pub mod storage;
