//! Cat/Dog Inference Engine
//!
//! Loads the pretrained classifier artifact once and serves binary
//! predictions using tract-onnx.

mod artifact;
mod backend;
mod compat;
mod config;
mod engine;
mod normalizer;
mod preprocess;

pub use artifact::{
    normalize_path, pack_artifact, Artifact, ArtifactFormatError, Manifest, OutputKind,
    PipelineSpec, TransformSpec, VocabEntry, ARTIFACT_MAGIC,
};
pub use backend::{InferenceBackend, Serialized, TractBackend};
pub use compat::{ShimRegistry, StandIn, TransformKind, CURRENT_EPOCH};
pub use config::EngineConfig;
pub use engine::{load_model, load_model_with, ModelInfo, Predictor};
pub use normalizer::{
    normalize, ClassToken, ClassificationResult, Label, RawPrediction, CAT_SENTINEL,
};
pub use preprocess::{PixelOp, Preprocessor, ResizeMethod};

pub use image_decoder::{DecodeError, DecodedImage};

use std::path::PathBuf;
use thiserror::Error;

/// Errors during inference
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    InvalidInputShape { expected: String, actual: String },
    #[error("Invalid model output: {0}")]
    InvalidOutput(String),
}

/// Startup-fatal errors while loading the model artifact
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Model artifact not found or unreadable: {}", path.display())]
    ArtifactNotFound { path: PathBuf },
    #[error("Model artifact {} is corrupt: {source}", path.display())]
    ArtifactCorrupt {
        path: PathBuf,
        #[source]
        source: ArtifactFormatError,
    },
}

/// Per-request classification failure
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The upload is not a decodable image
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] DecodeError),
    /// The forward pass failed for reasons unrelated to the input
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl ClassifyError {
    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, ClassifyError::InvalidImage(_))
    }
}
