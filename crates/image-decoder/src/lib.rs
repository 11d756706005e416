//! Image Decoding and Validation
//!
//! Turns opaque upload bytes into an RGB pixel buffer, rejecting anything that
//! is not a decodable image.

mod decoder;
mod error;
mod frame;

pub use decoder::{decode, DecodeLimits, ImageDecoder};
pub use error::DecodeError;
pub use frame::DecodedImage;

pub use image::ImageFormat;
