//! Informational Routes

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use inference_engine::ModelInfo;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppState;

const UPLOAD_PAGE: &str = include_str!("../../static/index.html");

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub model: ModelInfo,
}

/// Welcome message
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Welcome! POST an image to /predict, or open /ui to try the classifier."
    }))
}

/// Health check handler
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        model: state.predictor.info().clone(),
    })
}

/// Browser upload page
pub async fn ui() -> Html<&'static str> {
    Html(UPLOAD_PAGE)
}

/// Prometheus exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "Metrics are disabled" }))).into_response(),
    }
}
