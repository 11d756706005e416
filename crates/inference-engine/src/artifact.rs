//! Model artifact container
//!
//! Layout (little-endian):
//!
//! ```text
//! [0..4)      magic "PCLA"
//! [4..8)      u32 manifest length N
//! [8..8+N)    JSON manifest
//! [8+N..)     ONNX graph
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::normalizer::ClassToken;

/// File signature of a packed artifact
pub const ARTIFACT_MAGIC: &[u8; 4] = b"PCLA";

const HEADER_LEN: usize = 8;

/// Reasons an artifact could not be deserialized
#[derive(Debug, Error)]
pub enum ArtifactFormatError {
    #[error("bad magic bytes, not a classifier artifact")]
    BadMagic,
    #[error("truncated artifact: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("manifest is not valid JSON: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("artifact epoch {epoch} is not supported (current epoch is {current})")]
    UnsupportedEpoch { epoch: u32, current: u32 },
    #[error("unknown serialized type {0}")]
    UnknownType(String),
    #[error("invalid parameters for {type_name}: {reason}")]
    InvalidParams { type_name: String, reason: String },
    #[error("invalid pipeline: {0}")]
    Pipeline(String),
    #[error("invalid vocab: {0}")]
    Vocab(String),
    #[error("model graph failed to load: {0}")]
    Model(String),
}

/// Vocab entry as exported: older exporters wrote JSON booleans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VocabEntry {
    Flag(bool),
    Text(String),
}

impl VocabEntry {
    pub fn to_token(&self) -> ClassToken {
        match self {
            VocabEntry::Flag(flag) => ClassToken::from(*flag),
            VocabEntry::Text(text) => ClassToken::new(text.as_str()),
        }
    }
}

/// What the graph's single output holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Unnormalized scores; softmax is applied after the forward pass
    #[default]
    Logits,
    Probabilities,
}

/// Serialized transform: a type name plus free-form parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Serialized preprocessing pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub transforms: Vec<TransformSpec>,
}

/// Artifact manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Compatibility epoch of the exporter
    pub epoch: u32,
    /// Export directory in the exporting host's path syntax
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_from: Option<String>,
    pub vocab: Vec<VocabEntry>,
    #[serde(default)]
    pub output: OutputKind,
    pub pipeline: PipelineSpec,
}

impl Manifest {
    /// The two class tokens, in graph output order
    pub fn vocab_tokens(&self) -> Result<[ClassToken; 2], ArtifactFormatError> {
        let [first, second] = self.vocab.as_slice() else {
            return Err(ArtifactFormatError::Vocab(format!(
                "expected 2 classes, found {}",
                self.vocab.len()
            )));
        };
        let (first, second) = (first.to_token(), second.to_token());
        if first == second {
            return Err(ArtifactFormatError::Vocab(format!(
                "duplicate class token {}",
                first
            )));
        }
        Ok([first, second])
    }

    /// Export directory re-interpreted for this host
    pub fn export_path(&self) -> Option<PathBuf> {
        self.exported_from.as_deref().map(normalize_path)
    }
}

/// Parsed artifact
#[derive(Debug, Clone)]
pub struct Artifact {
    pub manifest: Manifest,
    /// Serialized ONNX graph
    pub model: Vec<u8>,
}

impl Artifact {
    /// Split a packed artifact into manifest and graph
    pub fn parse(bytes: &[u8]) -> Result<Self, ArtifactFormatError> {
        if bytes.len() < HEADER_LEN {
            return Err(ArtifactFormatError::Truncated {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if &bytes[..4] != ARTIFACT_MAGIC {
            return Err(ArtifactFormatError::BadMagic);
        }

        let manifest_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let manifest_end = HEADER_LEN + manifest_len;
        if bytes.len() < manifest_end {
            return Err(ArtifactFormatError::Truncated {
                needed: manifest_end,
                actual: bytes.len(),
            });
        }

        let manifest = serde_json::from_slice(&bytes[HEADER_LEN..manifest_end])?;
        let model = bytes[manifest_end..].to_vec();
        if model.is_empty() {
            return Err(ArtifactFormatError::Model("artifact has no model graph".to_string()));
        }

        Ok(Self { manifest, model })
    }
}

/// Pack a manifest and ONNX graph into a single artifact file
pub fn pack_artifact(manifest: &Manifest, model: &[u8]) -> Result<Vec<u8>, ArtifactFormatError> {
    let json = serde_json::to_vec(manifest)?;
    let manifest_len = u32::try_from(json.len())
        .map_err(|_| ArtifactFormatError::Pipeline("manifest too large".to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + json.len() + model.len());
    bytes.extend_from_slice(ARTIFACT_MAGIC);
    bytes.extend_from_slice(&manifest_len.to_le_bytes());
    bytes.extend_from_slice(&json);
    bytes.extend_from_slice(model);
    Ok(bytes)
}

/// Re-interpret a path written on any platform for the current host.
///
/// Both `/` and `\` are accepted as separators. On non-Windows hosts a
/// leading drive letter is dropped.
pub fn normalize_path(raw: &str) -> PathBuf {
    if cfg!(windows) {
        return PathBuf::from(raw.replace('/', "\\"));
    }

    let unified = raw.replace('\\', "/");
    let bytes = unified.as_bytes();
    let without_drive = if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &unified[2..]
    } else {
        unified.as_str()
    };
    PathBuf::from(without_drive)
}
