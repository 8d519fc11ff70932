//! Shared data models for the Argus detection backend.
//!
//! This crate provides Serde-serializable types for:
//! - Detections (label, confidence, bounding box)
//! - HTTP and WebSocket wire payloads
//! - Weight listing/upload responses

pub mod detection;
pub mod protocol;

// Re-export common types
pub use detection::Detection;
pub use protocol::{
    is_stop_message, unix_ts, ErrorMessage, HealthResponse, ImageFrame, ObjectsMessage,
    StreamStart, WeightList, WeightUploaded,
};
