//! Configuration management for the material page server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::render::ImageFormat;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub render: RenderConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    /// Root directory for the local provider
    pub root: PathBuf,
    /// Required for the s3 provider
    pub s3: Option<S3Config>,
    /// Base for relative refs with the http provider
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProvider {
    Local,
    S3,
    Http,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

/// Render cache and converter tuning
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Materialized source documents
    pub files_dir: PathBuf,
    /// Rendered page images
    pub images_dir: PathBuf,
    /// Long-edge pixel size passed to the rasterizer
    pub raster_scale: u32,
    pub cache_ttl: Duration,
    pub image_format: ImageFormat,
    pub max_cached_pages: usize,
    pub max_cached_sources: usize,
    pub max_concurrent_conversions: usize,
    pub convert_timeout: Duration,
    pub sweep_interval: Duration,
}

/// External tool locations
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub pdftoppm: PathBuf,
    pub pdfinfo: PathBuf,
    pub soffice: PathBuf,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            files_dir: PathBuf::from("./temp/files/"),
            images_dir: PathBuf::from("./temp/images/"),
            raster_scale: 2048,
            cache_ttl: Duration::from_secs(15 * 60),
            image_format: ImageFormat::Png,
            max_cached_pages: 1000,
            max_cached_sources: 32,
            max_concurrent_conversions: 4,
            convert_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            pdftoppm: PathBuf::from("pdftoppm"),
            pdfinfo: PathBuf::from("pdfinfo"),
            soffice: PathBuf::from("soffice"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./materials.db".to_string(),
            },
            storage: StorageConfig {
                provider: StorageProvider::Local,
                root: PathBuf::from("./uploads"),
                s3: None,
                base_url: None,
            },
            render: RenderConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let provider = match var("STORAGE_PROVIDER").as_deref().map(str::to_ascii_lowercase) {
            None => StorageProvider::Local,
            Some(p) if p == "local" => StorageProvider::Local,
            Some(p) if p == "s3" => StorageProvider::S3,
            Some(p) if p == "http" => StorageProvider::Http,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_PROVIDER",
                    message: format!("unknown provider '{}'", other),
                })
            }
        };

        let s3 = if provider == StorageProvider::S3 {
            Some(S3Config {
                endpoint: required("S3_ENDPOINT")?,
                bucket: required("S3_BUCKET")?,
                access_key: required("S3_ACCESS_KEY")?,
                secret_key: required("S3_SECRET_KEY")?,
                region: var("S3_REGION"),
            })
        } else {
            None
        };

        let image_format = match var("IMAGE_FORMAT") {
            Some(raw) => raw.parse::<ImageFormat>().map_err(|message| ConfigError::Invalid {
                name: "IMAGE_FORMAT",
                message,
            })?,
            None => defaults.render.image_format,
        };

        let render = &defaults.render;
        Ok(Config {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_or(&var, "SERVER_PORT", defaults.server.port),
            },
            database: DatabaseConfig {
                url: var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            storage: StorageConfig {
                provider,
                root: var("STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.root),
                s3,
                base_url: var("STORAGE_BASE_URL"),
            },
            render: RenderConfig {
                files_dir: var("TEMP_FILE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| render.files_dir.clone()),
                images_dir: var("TEMP_IMAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| render.images_dir.clone()),
                raster_scale: parse_or(&var, "RASTER_SCALE", render.raster_scale),
                cache_ttl: Duration::from_secs(parse_or(&var, "CACHE_TTL", render.cache_ttl.as_secs())),
                image_format,
                max_cached_pages: parse_or(&var, "MAX_CACHED_PAGES", render.max_cached_pages),
                max_cached_sources: parse_or(&var, "MAX_CACHED_SOURCES", render.max_cached_sources),
                max_concurrent_conversions: parse_or(
                    &var,
                    "MAX_CONCURRENT_CONVERSIONS",
                    render.max_concurrent_conversions,
                )
                .max(1),
                convert_timeout: Duration::from_secs(parse_or(
                    &var,
                    "CONVERT_TIMEOUT",
                    render.convert_timeout.as_secs(),
                )),
                sweep_interval: Duration::from_secs(
                    parse_or(&var, "SWEEP_INTERVAL", render.sweep_interval.as_secs()).max(1),
                ),
            },
            tools: ToolsConfig {
                pdftoppm: var("PDFTOPPM_BIN")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.tools.pdftoppm),
                pdfinfo: var("PDFINFO_BIN")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.tools.pdfinfo),
                soffice: var("SOFFICE_BIN")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.tools.soffice),
            },
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value '{}' for {}, using default {}", raw, name, default);
            default
        }),
        None => default,
    }
}
