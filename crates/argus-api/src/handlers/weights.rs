//! Weight listing and upload handlers.

use std::path::Path;

use axum::extract::{Multipart, State};
use axum::Json;
use tracing::{info, warn};

use argus_models::{WeightList, WeightUploaded};
use argus_vision::is_weight_file;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /weights: recognized weight artifacts in the model directory,
/// sorted by name. A missing directory is an empty list, not an error.
pub async fn list_weights(State(state): State<AppState>) -> ApiResult<Json<WeightList>> {
    let mut weights = Vec::new();

    match tokio::fs::read_dir(&state.config.model_dir).await {
        Ok(mut entries) => {
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| ApiError::internal(format!("Failed to read model dir: {}", e)))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                let is_file = entry
                    .file_type()
                    .await
                    .map(|t| t.is_file())
                    .unwrap_or(false);
                if is_file && is_weight_file(&name) {
                    weights.push(name);
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %state.config.model_dir.display(), "Model directory does not exist");
        }
        Err(e) => {
            return Err(ApiError::internal(format!(
                "Failed to read model dir: {}",
                e
            )));
        }
    }

    weights.sort();
    Ok(Json(WeightList { weights }))
}

/// POST /weights: upload one weight artifact into the model directory.
///
/// The stored name is the uploaded file's basename; anything without a
/// recognized weight extension is rejected before touching disk.
pub async fn upload_weight(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<WeightUploaded>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Missing filename"))?;

        // Strip any client-supplied directory components.
        let name = Path::new(&name)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::bad_request("Invalid filename"))?;

        if !is_weight_file(&name) {
            return Err(ApiError::bad_request(format!(
                "Unsupported weight format: {}",
                name
            )));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("Empty weight file"));
        }

        tokio::fs::create_dir_all(&state.config.model_dir)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create model dir: {}", e)))?;

        let dest = state.config.model_dir.join(&name);
        tokio::fs::write(&dest, &bytes)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to store weight: {}", e)))?;

        info!(path = %dest.display(), size = bytes.len(), "Weight uploaded");
        return Ok(Json(WeightUploaded { saved: name }));
    }

    Err(ApiError::bad_request("Missing file field"))
}
