//! HTTP and WebSocket wire payloads.
//!
//! The shapes here are the service's public contract: detection replies are
//! `{"objects": [...], "ts": <unix seconds>}` and failures are
//! `{"error": "<message>"}`, on both the single-shot and duplex paths.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::Detection;

/// Current wall-clock time as fractional unix seconds.
pub fn unix_ts() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Detection reply sent for a processed frame or image.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObjectsMessage {
    pub objects: Vec<Detection>,
    pub ts: f64,
}

impl ObjectsMessage {
    /// Wrap a detection list with the current timestamp.
    pub fn now(objects: Vec<Detection>) -> Self {
        Self {
            objects,
            ts: unix_ts(),
        }
    }
}

/// Error reply on a duplex session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorMessage {
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Client frame on the duplex image session.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ImageFrame {
    /// Base64 image payload, optionally prefixed with a data-URL header
    /// (`data:image/png;base64,...`).
    #[serde(default)]
    pub image: Option<String>,
}

impl ImageFrame {
    /// The base64 portion of the payload, with any data-URL header removed.
    pub fn base64_payload(&self) -> Option<&str> {
        let raw = self.image.as_deref()?;
        if raw.is_empty() {
            return None;
        }
        // "data:image/png;base64,AAAA" -> "AAAA"; plain base64 passes through.
        Some(raw.rsplit(',').next().unwrap_or(raw))
    }
}

/// First client message on a remote-stream session.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StreamStart {
    #[serde(default)]
    pub url: String,
    /// Optional weight selector (logical name or absolute path).
    #[serde(default)]
    pub weights: Option<String>,
}

/// Whether a client text frame asks a streaming session to stop.
///
/// Accepted forms: the bare literal `stop`, the JSON string `"stop"`, or
/// `{"action": "stop"}`.
pub fn is_stop_message(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("stop") {
        return true;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("stop"),
        Ok(serde_json::Value::Object(map)) => map
            .get("action")
            .and_then(|v| v.as_str())
            .map(|s| s.eq_ignore_ascii_case("stop"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Health probe response (liveness status plus server time).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    pub status: String,
    pub time: f64,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            time: unix_ts(),
        }
    }
}

/// Weight listing response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WeightList {
    pub weights: Vec<String>,
}

/// Weight upload response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WeightUploaded {
    pub saved: String,
}
