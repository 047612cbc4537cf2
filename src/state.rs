//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::render::PageService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    pages: PageService,
}

impl AppState {
    pub fn new(config: Config, pages: PageService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, pages }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the page service
    pub fn pages(&self) -> &PageService {
        &self.inner.pages
    }
}
