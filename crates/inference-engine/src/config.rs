//! Engine configuration

use image_decoder::DecodeLimits;
use serde::{Deserialize, Serialize};

/// Inference engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Guard the backend with a mutex so forward passes never overlap
    pub serialize_inference: bool,

    /// Limits for decoding uploads
    pub decode_limits: DecodeLimits,
}

impl EngineConfig {
    /// Config that serializes forward passes
    pub fn serialized() -> Self {
        Self {
            serialize_inference: true,
            ..Default::default()
        }
    }
}
