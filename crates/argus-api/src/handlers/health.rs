//! Health check handler.

use axum::Json;

use argus_models::HealthResponse;

/// Health check endpoint (liveness probe). Deliberately does not touch the
/// model registry: the service is alive even before any weights are loaded.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
