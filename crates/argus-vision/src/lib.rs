//! Argus vision pipeline: model registry, stream decoding, and detection
//! inference.
//!
//! The crate is the backend-agnostic core behind the HTTP surface. It
//! exposes:
//!
//! - [`registry::ModelRegistry`] for weight resolution and single-flight
//!   model loading
//! - [`detector::DetectionModel`] running YOLO-family ONNX inference
//! - [`decode`] frame sources with capture-then-FFmpeg fallback
//! - [`resolve`] for turning page URLs into direct media URLs
//! - [`session`] for the throttled, cancellable streaming loop

pub mod decode;
pub mod detector;
pub mod error;
pub mod frame;
pub mod probe;
pub mod registry;
pub mod resolve;
pub mod session;

pub use decode::{open_stream, BoxedFrameSource, FrameSource};
pub use detector::{DetectionModel, DetectorConfig, Infer, OnnxLoader, COCO_CLASSES};
pub use error::{VisionError, VisionResult};
pub use frame::RasterFrame;
pub use probe::{probe_stream, StreamInfo};
pub use registry::{is_weight_file, ModelRegistry, RegistryConfig, WeightLoader, WEIGHT_EXTENSIONS};
pub use resolve::{StreamResolver, YtDlpResolver};
pub use session::{spawn_session, SessionConfig, SessionEvent, SessionHandle};

/// Registry specialized to the production ONNX loader.
pub type DetectorRegistry = ModelRegistry<OnnxLoader>;
