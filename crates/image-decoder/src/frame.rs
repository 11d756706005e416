//! Decoded image type

use image::{ImageFormat, RgbImage};

/// Decoded RGB image owned by a single request
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// RGB pixel data (width * height * 3)
    pixels: RgbImage,
    /// Encoding the bytes were decoded from
    format: ImageFormat,
}

impl DecodedImage {
    /// Wrap an already decoded RGB buffer
    pub fn new(pixels: RgbImage, format: ImageFormat) -> Self {
        Self { pixels, format }
    }

    /// Image width
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Image height
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Source encoding
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Borrow the pixel buffer
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.pixels.get_pixel_checked(x, y).map(|p| p.0)
    }
}
