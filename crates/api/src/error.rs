//! API error types and their HTTP mapping

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use image_decoder::DecodeError;
use inference_engine::{ClassifyError, LoadError};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Per-request failures of the prediction endpoint
#[derive(Debug, Error)]
pub enum ApiError {
    /// Declared content type is not `image/*`
    #[error("File provided is not an image (content type {})", .0.as_deref().unwrap_or("missing"))]
    NotAnImage(Option<String>),

    #[error("Invalid image data: {0}")]
    InvalidImage(#[from] DecodeError),

    #[error("Field required: image")]
    MissingImage,

    #[error("{message}")]
    Multipart { status: StatusCode, message: String },

    /// Details are logged, never returned to the client
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotAnImage(_) | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingImage => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Multipart { status, .. } => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotAnImage(_) => "not_an_image",
            ApiError::InvalidImage(_) => "invalid_image",
            ApiError::MissingImage => "missing_image",
            ApiError::Multipart { .. } => "multipart",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<ClassifyError> for ApiError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::InvalidImage(e) => ApiError::InvalidImage(e),
            ClassifyError::Inference(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Multipart {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Multipart {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Internal(detail) => error!("Prediction failed: {}", detail),
            other => warn!("Rejected upload ({}): {}", status, other),
        }
        metrics::counter!("prediction_errors_total", "kind" => self.kind()).increment(1);

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Fatal server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Logging setup failed: {0}")]
    Logging(String),
    #[error("Metrics setup failed: {0}")]
    Metrics(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
