//! Prediction Route

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use inference_engine::ClassificationResult;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::AppState;

/// Multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

/// Read the `image` field, checking its declared content type
async fn read_image_field(multipart: &mut Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let content_type = field.content_type().map(str::to_owned);
        if !content_type.as_deref().is_some_and(|ct| ct.starts_with("image/")) {
            return Err(ApiError::NotAnImage(content_type));
        }

        let file_name = field.file_name().map(str::to_owned);
        let bytes = field.bytes().await?;
        debug!(
            "Received upload {:?} ({}, {} bytes)",
            file_name,
            content_type.as_deref().unwrap_or_default(),
            bytes.len()
        );
        return Ok(bytes);
    }

    Err(ApiError::MissingImage)
}

/// Classify an uploaded image
pub async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassificationResult>, ApiError> {
    let mut multipart = multipart?;
    let upload = read_image_field(&mut multipart).await?;

    // CPU-bound; keep it off the async workers
    let predictor = state.predictor.clone();
    let start = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || predictor.classify(&upload))
        .await
        .map_err(|e| ApiError::Internal(format!("classification task failed: {}", e)))?;
    let elapsed = start.elapsed();
    metrics::histogram!("prediction_duration_seconds").record(elapsed.as_secs_f64());

    let result = outcome?;
    info!(
        "Predicted {} (p={}) in {}ms",
        result.prediction.as_str(),
        result.probability,
        elapsed.as_millis()
    );
    metrics::counter!("predictions_total", "label" => result.prediction.as_str()).increment(1);

    Ok(Json(result))
}
