//! Image to input-tensor preprocessing

use image::imageops::{self, FilterType};
use image::RgbImage;
use image_decoder::DecodedImage;
use ndarray::Array4;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::artifact::{ArtifactFormatError, TransformSpec};
use crate::compat::TransformKind;

/// How the source image is fitted to the model input size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMethod {
    /// Stretch to the target size ignoring aspect ratio
    #[default]
    Squish,
    /// Center crop to the target aspect ratio, then resize
    Crop,
    /// Fit inside the target and pad with black borders
    Pad,
}

/// Per-channel scalar op on f32 pixel values
#[derive(Debug, Clone, PartialEq)]
pub enum PixelOp {
    Scale(f32),
    Normalize { mean: [f32; 3], std: [f32; 3] },
}

impl PixelOp {
    fn apply(&self, channel: usize, value: f32) -> f32 {
        match self {
            PixelOp::Scale(div) => value / div,
            PixelOp::Normalize { mean, std } => (value - mean[channel]) / std[channel],
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeParam {
    Square(u32),
    /// fastai order: (height, width)
    Pair([u32; 2]),
}

#[derive(Deserialize)]
struct ResizeParams {
    size: SizeParam,
    #[serde(default)]
    method: ResizeMethod,
}

fn default_div() -> f32 {
    255.0
}

#[derive(Deserialize)]
struct IntToFloatParams {
    #[serde(default = "default_div")]
    div: f32,
}

#[derive(Deserialize)]
struct NormalizeParams {
    mean: [f32; 3],
    std: [f32; 3],
}

fn params<T: DeserializeOwned>(spec: &TransformSpec) -> Result<T, ArtifactFormatError> {
    serde_json::from_value(serde_json::Value::Object(spec.params.clone())).map_err(|e| {
        ArtifactFormatError::InvalidParams {
            type_name: spec.type_name.clone(),
            reason: e.to_string(),
        }
    })
}

fn invalid(spec: &TransformSpec, reason: &str) -> ArtifactFormatError {
    ArtifactFormatError::InvalidParams {
        type_name: spec.type_name.clone(),
        reason: reason.to_string(),
    }
}

/// Converts a decoded image into a `[1, 3, H, W]` f32 tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    width: u32,
    height: u32,
    method: ResizeMethod,
    ops: Vec<PixelOp>,
}

impl Preprocessor {
    /// Resize only; pixel values stay in 0..=255
    pub fn new(width: u32, height: u32, method: ResizeMethod) -> Self {
        Self {
            width,
            height,
            method,
            ops: Vec::new(),
        }
    }

    /// Append a scalar op
    pub fn with_op(mut self, op: PixelOp) -> Self {
        self.ops.push(op);
        self
    }

    /// Build from resolved manifest transforms.
    ///
    /// Exactly one `Resize` is required; scalar transforms keep their order.
    pub fn from_transforms(
        transforms: &[(TransformKind, &TransformSpec)],
    ) -> Result<Self, ArtifactFormatError> {
        let mut resize = None;
        let mut ops = Vec::new();

        for (kind, spec) in transforms {
            match kind {
                TransformKind::Resize => {
                    if resize.is_some() {
                        return Err(ArtifactFormatError::Pipeline(
                            "more than one Resize transform".to_string(),
                        ));
                    }
                    let p: ResizeParams = params(spec)?;
                    let (height, width) = match p.size {
                        SizeParam::Square(side) => (side, side),
                        SizeParam::Pair([h, w]) => (h, w),
                    };
                    if width == 0 || height == 0 {
                        return Err(invalid(spec, "size must be non-zero"));
                    }
                    resize = Some((width, height, p.method));
                }
                TransformKind::IntToFloat => {
                    let p: IntToFloatParams = params(spec)?;
                    if p.div == 0.0 || !p.div.is_finite() {
                        return Err(invalid(spec, "div must be a non-zero number"));
                    }
                    ops.push(PixelOp::Scale(p.div));
                }
                TransformKind::Normalize => {
                    let p: NormalizeParams = params(spec)?;
                    if p.std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
                        return Err(invalid(spec, "std entries must be non-zero"));
                    }
                    ops.push(PixelOp::Normalize {
                        mean: p.mean,
                        std: p.std,
                    });
                }
                TransformKind::ToTensor => {}
            }
        }

        let (width, height, method) = resize
            .ok_or_else(|| ArtifactFormatError::Pipeline("missing Resize transform".to_string()))?;
        Ok(Self {
            width,
            height,
            method,
            ops,
        })
    }

    /// Model input shape (NCHW)
    pub fn input_shape(&self) -> [usize; 4] {
        [1, 3, self.height as usize, self.width as usize]
    }

    pub fn method(&self) -> ResizeMethod {
        self.method
    }

    pub fn ops(&self) -> &[PixelOp] {
        &self.ops
    }

    fn fit(&self, src: &RgbImage) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let (sw, sh) = (src.width(), src.height());

        match self.method {
            ResizeMethod::Squish => imageops::resize(src, w, h, FilterType::Triangle),
            ResizeMethod::Crop => {
                let scale = f64::max(w as f64 / sw as f64, h as f64 / sh as f64);
                let cw = ((w as f64 / scale).round() as u32).clamp(1, sw);
                let ch = ((h as f64 / scale).round() as u32).clamp(1, sh);
                let cropped = imageops::crop_imm(src, (sw - cw) / 2, (sh - ch) / 2, cw, ch).to_image();
                imageops::resize(&cropped, w, h, FilterType::Triangle)
            }
            ResizeMethod::Pad => {
                let scale = f64::min(w as f64 / sw as f64, h as f64 / sh as f64);
                let nw = ((sw as f64 * scale).round() as u32).clamp(1, w);
                let nh = ((sh as f64 * scale).round() as u32).clamp(1, h);
                let resized = imageops::resize(src, nw, nh, FilterType::Triangle);
                let mut canvas = RgbImage::new(w, h);
                imageops::overlay(&mut canvas, &resized, ((w - nw) / 2) as i64, ((h - nh) / 2) as i64);
                canvas
            }
        }
    }

    /// Resize and convert to a standard-layout NCHW tensor
    pub fn run(&self, image: &DecodedImage) -> Array4<f32> {
        let fitted = self.fit(image.pixels());

        let mut input = Array4::<f32>::zeros((1, 3, self.height as usize, self.width as usize));
        for (x, y, pixel) in fitted.enumerate_pixels() {
            for channel in 0..3 {
                let value = self
                    .ops
                    .iter()
                    .fold(pixel[channel] as f32, |v, op| op.apply(channel, v));
                input[[0, channel, y as usize, x as usize]] = value;
            }
        }
        input
    }
}
