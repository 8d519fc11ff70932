//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

use argus_vision::{RegistryConfig, SessionConfig};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Directory holding model weights
    pub model_dir: PathBuf,
    /// Default weight filename
    pub default_weight: String,
    /// Minimum interval between streamed detection events
    pub emit_interval: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            model_dir: PathBuf::from("models"),
            default_weight: "yolov8n.onnx".to_string(),
            emit_interval: Duration::from_millis(500),
            max_body_size: 20 * 1024 * 1024, // 20MB, frames are base64 images
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            model_dir: std::env::var("MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            default_weight: std::env::var("MODEL_PATH")
                .unwrap_or_else(|_| "yolov8n.onnx".to_string()),
            emit_interval: Duration::from_millis(
                std::env::var("EMIT_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20 * 1024 * 1024),
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Registry view of this configuration.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            weights_dir: self.model_dir.clone(),
            default_weight: self.default_weight.clone(),
        }
    }

    /// Session view of this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            emit_interval: self.emit_interval,
            ..SessionConfig::default()
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
