//! Upload decoder with size limits

use std::io::Cursor;

use image::{ImageReader, Limits};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DecodeError;
use crate::frame::DecodedImage;

/// Decode limits applied before any pixel data is allocated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeLimits {
    /// Maximum accepted width in pixels
    pub max_width: u32,
    /// Maximum accepted height in pixels
    pub max_height: u32,
    /// Maximum bytes the decoder may allocate
    pub max_alloc_bytes: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_width: 8192,
            max_height: 8192,
            max_alloc_bytes: 512 * 1024 * 1024,
        }
    }
}

impl DecodeLimits {
    fn to_image_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_width);
        limits.max_image_height = Some(self.max_height);
        limits.max_alloc = Some(self.max_alloc_bytes);
        limits
    }
}

/// Decoder for uploaded image bytes
#[derive(Debug, Clone, Default)]
pub struct ImageDecoder {
    limits: DecodeLimits,
}

impl ImageDecoder {
    /// Create a decoder with the given limits
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    /// Get the configured limits
    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    /// Decode bytes of any supported encoding into an RGB image.
    ///
    /// The encoding is sniffed from the content, never from a file name or
    /// declared content type.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let format = reader.format().ok_or(DecodeError::UnrecognizedFormat)?;
        reader.limits(self.limits.to_image_limits());

        let image = reader.decode()?;
        if image.width() == 0 || image.height() == 0 {
            return Err(DecodeError::ZeroDimensions);
        }

        debug!(
            "Decoded {:?} image: {}x{} ({} bytes)",
            format,
            image.width(),
            image.height(),
            bytes.len()
        );

        Ok(DecodedImage::new(image.to_rgb8(), format))
    }
}

/// Decode with default limits
pub fn decode(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    ImageDecoder::default().decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use proptest::prelude::*;

    fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let v = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ (x * y);
            Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
        });
        encode(image, ImageFormat::Png)
    }

    #[test]
    fn test_decode_png() {
        let bytes = encode(RgbImage::from_pixel(12, 7, Rgb([200, 10, 10])), ImageFormat::Png);
        let image = decode(&bytes).unwrap();

        assert_eq!(image.width(), 12);
        assert_eq!(image.height(), 7);
        assert_eq!(image.format(), ImageFormat::Png);
        assert_eq!(image.get_pixel(0, 0), Some([200, 10, 10]));
    }

    #[test]
    fn test_decode_jpeg() {
        let bytes = encode(RgbImage::from_pixel(16, 16, Rgb([90, 90, 90])), ImageFormat::Jpeg);
        let image = decode(&bytes).unwrap();

        assert_eq!(image.format(), ImageFormat::Jpeg);
        assert_eq!((image.width(), image.height()), (16, 16));
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(decode(&[]).unwrap_err(), DecodeError::Empty);
    }

    #[test]
    fn test_text_is_rejected() {
        let err = decode(b"this is a plain text document, not a photo").unwrap_err();
        assert_eq!(err, DecodeError::UnrecognizedFormat);
    }

    #[test]
    fn test_corrupt_png_body() {
        let mut bytes = noisy_png(32, 32);
        let len = bytes.len();
        for b in &mut bytes[50..len - 12] {
            *b = 0xAB;
        }
        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_dimension_limit() {
        let decoder = ImageDecoder::new(DecodeLimits {
            max_width: 16,
            ..Default::default()
        });
        let bytes = encode(RgbImage::new(32, 8), ImageFormat::Png);

        assert!(matches!(decoder.decode(&bytes), Err(DecodeError::TooLarge(_))));
    }

    proptest! {
        #[test]
        fn prop_truncated_png_is_rejected(cut in 0usize..10_000) {
            let bytes = noisy_png(48, 48);
            let cut = cut % (bytes.len() / 2);
            prop_assert!(decode(&bytes[..cut]).is_err());
        }

        #[test]
        fn prop_text_is_rejected(text in "[a-zA-Z ,.!?]{0,256}") {
            prop_assert!(decode(text.as_bytes()).is_err());
        }
    }
}
