//! Predictor Implementation

use image_decoder::{DecodedImage, ImageDecoder};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::artifact::{Artifact, ArtifactFormatError, OutputKind};
use crate::backend::{InferenceBackend, Serialized, TractBackend};
use crate::compat::{ShimRegistry, CURRENT_EPOCH};
use crate::config::EngineConfig;
use crate::normalizer::{normalize, ClassToken, ClassificationResult, RawPrediction};
use crate::preprocess::Preprocessor;
use crate::{ClassifyError, InferenceError, LoadError};

/// Tolerance for a probability vector summing to one
const SUM_TOLERANCE: f32 = 1e-3;

/// Descriptive information about the loaded model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    /// Artifact the model was loaded from
    pub artifact_path: Option<PathBuf>,
    /// Manifest epoch
    pub epoch: u32,
    /// Export directory, re-interpreted for this host
    pub exported_from: Option<PathBuf>,
    /// Class tokens in output order
    pub vocab: [String; 2],
    /// NCHW input shape
    pub input_shape: [usize; 4],
    /// Legacy type names resolved while loading
    pub legacy_shims: usize,
    pub backend: String,
}

/// Loaded classifier, shared read-only by every request
pub struct Predictor {
    preprocessor: Preprocessor,
    vocab: [ClassToken; 2],
    output: OutputKind,
    backend: Box<dyn InferenceBackend>,
    decoder: ImageDecoder,
    info: ModelInfo,
}

impl fmt::Debug for Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predictor")
            .field("preprocessor", &self.preprocessor)
            .field("output", &self.output)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Predictor {
    /// Assemble a predictor around any backend
    pub fn new<B>(preprocessor: Preprocessor, vocab: [ClassToken; 2], output: OutputKind, backend: B) -> Self
    where
        B: InferenceBackend + 'static,
    {
        let info = ModelInfo {
            artifact_path: None,
            epoch: CURRENT_EPOCH,
            exported_from: None,
            vocab: [vocab[0].to_string(), vocab[1].to_string()],
            input_shape: preprocessor.input_shape(),
            legacy_shims: 0,
            backend: backend.name().to_string(),
        };

        Self {
            preprocessor,
            vocab,
            output,
            backend: Box::new(backend),
            decoder: ImageDecoder::default(),
            info,
        }
    }

    /// Replace the upload decoder
    pub fn with_decoder(mut self, decoder: ImageDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Get model information
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Run the forward pass on a decoded image
    pub fn predict(&self, image: &DecodedImage) -> Result<RawPrediction, InferenceError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(InferenceError::InvalidInputShape {
                expected: "non-empty RGB image".to_string(),
                actual: format!("{}x{}", image.width(), image.height()),
            });
        }

        let start = Instant::now();
        let input = self.preprocessor.run(image);
        let output = self.backend.forward(input)?;

        let values: [f32; 2] = output.as_slice().try_into().map_err(|_| {
            InferenceError::InvalidOutput(format!("expected 2 class scores, got {}", output.len()))
        })?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::InvalidOutput(format!(
                "non-finite class scores {:?}",
                values
            )));
        }

        let probabilities = match self.output {
            OutputKind::Logits => softmax(values),
            OutputKind::Probabilities => values,
        };
        let probabilities = to_distribution(probabilities)?;

        // Ties go to the first class
        let index = if probabilities[1] > probabilities[0] { 1 } else { 0 };

        debug!(
            "Inference completed in {}ms: {} {:?}",
            start.elapsed().as_millis(),
            self.vocab[index],
            probabilities
        );

        Ok(RawPrediction {
            class_token: self.vocab[index].clone(),
            probabilities,
        })
    }

    /// Predict and normalize an already decoded image
    pub fn classify_image(&self, image: &DecodedImage) -> Result<ClassificationResult, InferenceError> {
        self.predict(image).map(|raw| normalize(&raw))
    }

    /// Decode, predict and normalize raw upload bytes
    pub fn classify(&self, image_bytes: &[u8]) -> Result<ClassificationResult, ClassifyError> {
        let image = self.decoder.decode(image_bytes)?;
        Ok(self.classify_image(&image)?)
    }
}

fn softmax(logits: [f32; 2]) -> [f32; 2] {
    let max = logits[0].max(logits[1]);
    let e0 = (logits[0] - max).exp();
    let e1 = (logits[1] - max).exp();
    let sum = e0 + e1;
    [e0 / sum, e1 / sum]
}

/// Validate a probability vector and clamp rounding drift back into [0, 1]
fn to_distribution(probabilities: [f32; 2]) -> Result<[f32; 2], InferenceError> {
    let in_range = probabilities
        .iter()
        .all(|p| (-SUM_TOLERANCE..=1.0 + SUM_TOLERANCE).contains(p));
    let sum: f32 = probabilities.iter().sum();
    if !in_range || (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(InferenceError::InvalidOutput(format!(
            "not a probability distribution: {:?}",
            probabilities
        )));
    }

    let clamped = probabilities.map(|p| p.clamp(0.0, 1.0));
    let total = clamped[0] + clamped[1];
    Ok([(clamped[0] / total).min(1.0), (clamped[1] / total).min(1.0)])
}

/// Load the artifact at `path` with default configuration
pub fn load_model(path: impl AsRef<Path>) -> Result<Predictor, LoadError> {
    load_model_with(path, &EngineConfig::default())
}

/// Load the artifact at `path`.
///
/// Runs once at startup. Both error variants are fatal to the service.
pub fn load_model_with(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Predictor, LoadError> {
    let path = path.as_ref();
    info!("Loading model artifact from {}", path.display());

    if !path.is_file() {
        error!("Model artifact {} does not exist", path.display());
        return Err(LoadError::ArtifactNotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|e| {
        error!("Failed to read model artifact {}: {}", path.display(), e);
        LoadError::ArtifactNotFound {
            path: path.to_path_buf(),
        }
    })?;

    let mut predictor = build_predictor(&bytes, config).map_err(|source| {
        error!("Model artifact {} is corrupt: {}", path.display(), source);
        LoadError::ArtifactCorrupt {
            path: path.to_path_buf(),
            source,
        }
    })?;
    predictor.info.artifact_path = Some(path.to_path_buf());

    info!(
        "Model loaded: epoch={}, vocab={:?}, input={:?}, exported_from={:?}",
        predictor.info.epoch, predictor.info.vocab, predictor.info.input_shape, predictor.info.exported_from
    );
    Ok(predictor)
}

fn build_predictor(bytes: &[u8], config: &EngineConfig) -> Result<Predictor, ArtifactFormatError> {
    build_predictor_with(bytes, config, |model, input_shape| {
        TractBackend::from_onnx_bytes(model, input_shape).map_err(|e| ArtifactFormatError::Model(e.to_string()))
    })
}

/// Assemble a predictor from container bytes, creating the backend from
/// the embedded graph and the preprocessor's input shape
fn build_predictor_with<B, F>(
    bytes: &[u8],
    config: &EngineConfig,
    make_backend: F,
) -> Result<Predictor, ArtifactFormatError>
where
    B: InferenceBackend + 'static,
    F: FnOnce(&[u8], [usize; 4]) -> Result<B, ArtifactFormatError>,
{
    let artifact = Artifact::parse(bytes)?;
    let manifest = &artifact.manifest;

    let resolved = ShimRegistry::builtin().resolve(manifest)?;
    if resolved.legacy_names > 0 {
        info!(
            "Resolved {} legacy type names for epoch {} artifact",
            resolved.legacy_names, manifest.epoch
        );
    }

    let preprocessor = Preprocessor::from_transforms(&resolved.transforms)?;
    let vocab = manifest.vocab_tokens()?;
    if !vocab.iter().any(ClassToken::is_cat_sentinel) {
        warn!("Vocab {:?} has no cat token; every prediction will be Dog", vocab);
    }

    let backend = make_backend(&artifact.model, preprocessor.input_shape())?;

    let epoch = manifest.epoch;
    let legacy_shims = resolved.legacy_names;
    let exported_from = manifest.export_path();
    let output = manifest.output;

    let predictor = if config.serialize_inference {
        Predictor::new(preprocessor, vocab, output, Serialized::new(backend))
    } else {
        Predictor::new(preprocessor, vocab, output, backend)
    };
    let mut predictor = predictor.with_decoder(ImageDecoder::new(config.decode_limits.clone()));

    predictor.info.epoch = epoch;
    predictor.info.legacy_shims = legacy_shims;
    predictor.info.exported_from = exported_from;
    Ok(predictor)
}
