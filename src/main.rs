//! Material Page Server
//!
//! Serves pages of uploaded course materials as images, converting each
//! page once and caching the result.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use material_page_server::config::Config;
use material_page_server::convert::PopplerConverter;
use material_page_server::db::{self, MaterialRepository};
use material_page_server::render::PageService;
use material_page_server::routes;
use material_page_server::state::AppState;
use material_page_server::storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "material_page_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;

    tracing::info!("Starting Material Page Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        files = %config.render.files_dir.display(),
        images = %config.render.images_dir.display(),
        scale = config.render.raster_scale,
        ttl_secs = config.render.cache_ttl.as_secs(),
        "Render settings"
    );

    tokio::fs::create_dir_all(&config.render.files_dir)
        .await
        .context("Failed to create TEMP_FILE_PATH")?;
    tokio::fs::create_dir_all(&config.render.images_dir)
        .await
        .context("Failed to create TEMP_IMAGE_PATH")?;

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    // Initialize blob storage
    let blobs = storage::connect(&config.storage)
        .await
        .context("Failed to initialize storage")?;

    let pages = PageService::new(
        Arc::new(MaterialRepository::new(db_pool)),
        blobs,
        Arc::new(PopplerConverter::new(config.tools.clone())),
        config.render.clone(),
    );
    let sweeper = pages.start_sweep_task();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid SERVER_HOST/SERVER_PORT")?;
    let app = routes::app(AppState::new(config, pages));

    // Start server with graceful shutdown
    tracing::info!("Material Page Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
