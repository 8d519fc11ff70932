//! Single-shot prediction handler.

use std::time::Instant;

use axum::extract::{Multipart, State};
use axum::Json;
use tracing::debug;

use argus_models::ObjectsMessage;
use argus_vision::{Infer, RasterFrame};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// POST /predict: run detection on one uploaded image.
///
/// Multipart fields: `file` (required, encoded image) and `weights`
/// (optional weight selector; the default model is used when absent).
pub async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ObjectsMessage>> {
    let mut image_bytes: Option<Vec<u8>> = None;
    let mut weights: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?;
                image_bytes = Some(bytes.to_vec());
            }
            Some("weights") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid weights field: {}", e)))?;
                if !value.trim().is_empty() {
                    weights = Some(value);
                }
            }
            _ => {}
        }
    }

    let image_bytes = image_bytes.ok_or_else(|| ApiError::bad_request("Missing file field"))?;

    // DecodeRead maps to 400: a frame we cannot decode is the client's error.
    let frame = RasterFrame::decode_image(&image_bytes)?;

    let model = match state.registry.get_or_load(weights.as_deref()).await {
        Ok(m) => {
            metrics::record_model_load("ok");
            m
        }
        Err(e) => {
            metrics::record_model_load("error");
            return Err(e.into());
        }
    };

    let start = Instant::now();
    let objects = model.infer(&frame)?;
    metrics::record_inference_duration(start.elapsed().as_secs_f64());
    metrics::record_frame_processed("predict");

    debug!(count = objects.len(), "Prediction completed");
    Ok(Json(ObjectsMessage::now(objects)))
}
