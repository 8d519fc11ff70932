//! Application state.

use std::sync::Arc;

use argus_vision::{DetectorRegistry, ModelRegistry, OnnxLoader, StreamResolver, YtDlpResolver};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub registry: Arc<DetectorRegistry>,
    pub resolver: Arc<dyn StreamResolver>,
}

impl AppState {
    /// Create new application state with the production loader and resolver.
    pub fn new(config: ApiConfig) -> Self {
        let registry = ModelRegistry::new(config.registry_config(), OnnxLoader::default());

        Self {
            config,
            registry: Arc::new(registry),
            resolver: Arc::new(YtDlpResolver::new()),
        }
    }

    /// Swap the resolver; used by tests to avoid the yt-dlp binary.
    pub fn with_resolver(mut self, resolver: Arc<dyn StreamResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}
