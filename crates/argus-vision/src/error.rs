//! Error types for decoding and inference.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for vision operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// Errors that can occur while resolving, decoding, or running inference.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    /// The decoder could not be opened at all. Fatal to the session.
    #[error("Failed to open stream: {0}")]
    DecodeOpen(String),

    /// A single frame read failed. Transient; callers retry after a short
    /// delay.
    #[error("Frame read failed: {0}")]
    DecodeRead(String),

    /// The stream finished or the decode pipeline exited. Terminal for a
    /// live session, reported once.
    #[error("Stream ended")]
    StreamEnded,

    #[error("Unable to resolve stream: {0}")]
    Resolve(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Unsupported weight format: {0}")]
    UnsupportedWeight(String),

    /// A single inference call failed. Fatal to that call only.
    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VisionError {
    /// Create a decode-open failure.
    pub fn decode_open(message: impl Into<String>) -> Self {
        Self::DecodeOpen(message.into())
    }

    /// Create a transient frame-read failure.
    pub fn decode_read(message: impl Into<String>) -> Self {
        Self::DecodeRead(message.into())
    }

    /// Create a resolver failure.
    pub fn resolve(message: impl Into<String>) -> Self {
        Self::Resolve(message.into())
    }

    /// Create a model-load failure.
    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad(message.into())
    }

    /// Create a detection failure.
    pub fn detection(message: impl Into<String>) -> Self {
        Self::Detection(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error is transient at the frame level (retry instead of
    /// tearing the session down).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DecodeRead(_))
    }
}
