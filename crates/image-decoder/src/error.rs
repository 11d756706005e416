//! Decode Error Types

use image::ImageError;
use thiserror::Error;

/// Reasons an upload could not be turned into an image.
///
/// Every variant is a caller input problem; none of them indicate a fault in
/// the service itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Zero-length buffer
    #[error("Image data is empty")]
    Empty,

    /// Bytes do not start with any known image signature
    #[error("Unrecognized image encoding")]
    UnrecognizedFormat,

    /// Recognized but not decodable by this build
    #[error("Unsupported image: {0}")]
    Unsupported(String),

    /// Corrupt or truncated image data
    #[error("Malformed image data: {0}")]
    Malformed(String),

    /// Dimensions or allocation over the configured limits
    #[error("Image exceeds decode limits: {0}")]
    TooLarge(String),

    /// Decoded to an image with no pixels
    #[error("Image has zero width or height")]
    ZeroDimensions,
}

impl From<ImageError> for DecodeError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Limits(e) => DecodeError::TooLarge(e.to_string()),
            ImageError::Unsupported(e) => DecodeError::Unsupported(e.to_string()),
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}
