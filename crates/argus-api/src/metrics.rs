//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "argus_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "argus_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "argus_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "argus_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "argus_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "argus_ws_messages_sent_total";

    // Detection metrics
    pub const FRAMES_PROCESSED_TOTAL: &str = "argus_frames_processed_total";
    pub const INFERENCE_DURATION_SECONDS: &str = "argus_inference_duration_seconds";
    pub const MODEL_LOADS_TOTAL: &str = "argus_model_loads_total";
    pub const SESSIONS_STARTED_TOTAL: &str = "argus_sessions_started_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_CONNECTIONS_TOTAL, &labels).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record WebSocket message sent.
pub fn record_ws_message_sent(endpoint: &str, message_type: &str) {
    let labels = [
        ("endpoint", endpoint.to_string()),
        ("type", message_type.to_string()),
    ];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

/// Record a frame pushed through inference.
pub fn record_frame_processed(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::FRAMES_PROCESSED_TOTAL, &labels).increment(1);
}

/// Record inference duration.
pub fn record_inference_duration(duration_secs: f64) {
    histogram!(names::INFERENCE_DURATION_SECONDS).record(duration_secs);
}

/// Record a model load.
pub fn record_model_load(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::MODEL_LOADS_TOTAL, &labels).increment(1);
}

/// Record a streaming session start.
pub fn record_session_started() {
    counter!(names::SESSIONS_STARTED_TOTAL).increment(1);
}

/// Routes the server actually serves. Anything else collapses to one label
/// so arbitrary request paths cannot blow up metric cardinality.
const KNOWN_PATHS: &[&str] = &[
    "/health",
    "/metrics",
    "/predict",
    "/weights",
    "/ws/detect",
    "/ws/stream",
];

/// Sanitize path for metrics labels.
fn sanitize_path(path: &str) -> String {
    if KNOWN_PATHS.contains(&path) {
        path.to_string()
    } else {
        "unmatched".to_string()
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/health"), "/health");
        assert_eq!(sanitize_path("/predict"), "/predict");
        assert_eq!(sanitize_path("/ws/stream"), "/ws/stream");
        assert_eq!(sanitize_path("/favicon.ico"), "unmatched");
        assert_eq!(sanitize_path("/predict/../etc/passwd"), "unmatched");
        assert_eq!(sanitize_path("/weights/some-random-name"), "unmatched");
    }
}
