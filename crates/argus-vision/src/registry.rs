//! Model registry: weight resolution and single-flight model loading.
//!
//! The registry owns at most one loaded model at a time, keyed by the
//! resolved artifact path. Loading is expensive, so the cache slot's async
//! mutex is held across the load: concurrent callers for the same resolved
//! path coalesce into a single underlying load and all receive the same
//! shared handle.
//!
//! Callers hold an `Arc` to the model they were given; replacing the cache
//! entry never invalidates an in-flight inference.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::VisionResult;

/// Recognized model-artifact extensions in the weights directory.
pub const WEIGHT_EXTENSIONS: &[&str] = &["onnx", "pt"];

/// Whether a filename carries a recognized model-artifact extension.
pub fn is_weight_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| WEIGHT_EXTENSIONS.iter().any(|w| ext.eq_ignore_ascii_case(w)))
        .unwrap_or(false)
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding weight artifacts; bare weight names resolve here.
    pub weights_dir: PathBuf,
    /// Weight used when a request names none.
    pub default_weight: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            weights_dir: PathBuf::from("models"),
            default_weight: "yolov8n.onnx".to_string(),
        }
    }
}

/// Loads a model artifact from a resolved path.
///
/// The production implementation builds an ONNX session; tests inject fakes
/// to count loads.
#[async_trait]
pub trait WeightLoader: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    async fn load(&self, path: &Path) -> VisionResult<Self::Model>;
}

struct CacheEntry<M> {
    path: PathBuf,
    model: Arc<M>,
}

/// Single-cached-model registry over an injected loader.
pub struct ModelRegistry<L: WeightLoader> {
    config: RegistryConfig,
    loader: L,
    cache: Mutex<Option<CacheEntry<L::Model>>>,
}

impl<L: WeightLoader> ModelRegistry<L> {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig, loader: L) -> Self {
        Self {
            config,
            loader,
            cache: Mutex::new(None),
        }
    }

    /// Resolve a weight identifier to a concrete artifact path.
    ///
    /// Absolute paths are used as-is; bare names resolve inside the weights
    /// directory; `None` (or an empty selector) falls back to the configured
    /// default. Pure and deterministic.
    pub fn resolve(&self, weight: Option<&str>) -> PathBuf {
        let name = weight
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .unwrap_or(&self.config.default_weight);
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.config.weights_dir.join(name)
        }
    }

    /// Return the cached model for the resolved path, loading it first if the
    /// requested weight differs from what is cached.
    ///
    /// On load failure the cache is left unchanged, so a previously loaded
    /// model keeps serving other sessions.
    pub async fn get_or_load(&self, weight: Option<&str>) -> VisionResult<Arc<L::Model>> {
        let resolved = self.resolve(weight);

        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.as_ref() {
            if entry.path == resolved {
                return Ok(Arc::clone(&entry.model));
            }
        }

        info!(path = %resolved.display(), "Loading model weights");
        let model = match self.loader.load(&resolved).await {
            Ok(m) => Arc::new(m),
            Err(e) => {
                warn!(path = %resolved.display(), error = %e, "Model load failed");
                return Err(e);
            }
        };

        *cache = Some(CacheEntry {
            path: resolved,
            model: Arc::clone(&model),
        });
        Ok(model)
    }

    /// Path of the currently cached model, if any.
    pub async fn cached_path(&self) -> Option<PathBuf> {
        self.cache.lock().await.as_ref().map(|e| e.path.clone())
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VisionError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingLoader {
        loads: AtomicUsize,
        fail_for: Option<PathBuf>,
    }

    impl CountingLoader {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_for: None,
            }
        }

        fn failing_for(path: impl Into<PathBuf>) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_for: Some(path.into()),
            }
        }
    }

    #[async_trait]
    impl WeightLoader for CountingLoader {
        type Model = PathBuf;

        async fn load(&self, path: &Path) -> VisionResult<PathBuf> {
            // Simulate disk + initialization latency so concurrent callers
            // really do overlap.
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.as_deref() == Some(path) {
                return Err(VisionError::model_load("corrupt artifact"));
            }
            Ok(path.to_path_buf())
        }
    }

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            weights_dir: PathBuf::from("/weights"),
            default_weight: "yolov8n.onnx".to_string(),
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = ModelRegistry::new(test_config(), CountingLoader::new());

        assert_eq!(
            registry.resolve(None),
            PathBuf::from("/weights/yolov8n.onnx")
        );
        assert_eq!(
            registry.resolve(Some("custom.onnx")),
            PathBuf::from("/weights/custom.onnx")
        );
        assert_eq!(
            registry.resolve(Some("/abs/path/best.onnx")),
            PathBuf::from("/abs/path/best.onnx")
        );
        // Empty selector falls back to the default.
        assert_eq!(registry.resolve(Some("  ")), registry.resolve(None));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_reload() {
        let registry = ModelRegistry::new(test_config(), CountingLoader::new());

        let a = registry.get_or_load(Some("a.onnx")).await.unwrap();
        let b = registry.get_or_load(Some("a.onnx")).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_weights_load_once_each() {
        let registry = ModelRegistry::new(test_config(), CountingLoader::new());

        registry.get_or_load(Some("a.onnx")).await.unwrap();
        registry.get_or_load(Some("b.onnx")).await.unwrap();
        registry.get_or_load(Some("b.onnx")).await.unwrap();

        assert_eq!(registry.loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(
            registry.cached_path().await,
            Some(PathBuf::from("/weights/b.onnx"))
        );
    }

    #[tokio::test]
    async fn test_concurrent_requests_single_flight() {
        let registry = Arc::new(ModelRegistry::new(test_config(), CountingLoader::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get_or_load(Some("shared.onnx")).await.unwrap()
            }));
        }

        let mut models = Vec::new();
        for handle in handles {
            models.push(handle.await.unwrap());
        }

        assert_eq!(registry.loader.loads.load(Ordering::SeqCst), 1);
        for model in &models[1..] {
            assert!(Arc::ptr_eq(&models[0], model));
        }
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_model() {
        let registry = ModelRegistry::new(
            test_config(),
            CountingLoader::failing_for("/weights/broken.onnx"),
        );

        let good = registry.get_or_load(Some("good.onnx")).await.unwrap();

        let err = registry.get_or_load(Some("broken.onnx")).await.unwrap_err();
        assert!(matches!(err, VisionError::ModelLoad(_)));

        // Previous model still cached and served without another load.
        let again = registry.get_or_load(Some("good.onnx")).await.unwrap();
        assert!(Arc::ptr_eq(&good, &again));
        assert_eq!(registry.loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_weight_extension_filter() {
        assert!(is_weight_file("yolov8n.onnx"));
        assert!(is_weight_file("model.PT"));
        assert!(!is_weight_file("notes.txt"));
        assert!(!is_weight_file("onnx"));
        assert!(!is_weight_file(""));
    }
}
