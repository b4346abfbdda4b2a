use anyhow::{Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

const DEFAULT_JPEG_QUALITY: u8 = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Png,
    Jpg,
}

impl ImageType {
    pub fn mime(self) -> &'static str {
        match self {
            ImageType::Png => "image/png",
            ImageType::Jpg => "image/jpeg",
        }
    }
}

/// How a grabbed frame is turned into the submitted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureFormat {
    pub image_type: ImageType,
    /// JPEG quality in `[0, 1]`; `None` uses the encoder default.
    pub quality: Option<f32>,
    /// Flip horizontally so the capture matches the mirrored preview.
    pub mirror: bool,
    /// Output size relative to the frame.
    pub size_factor: f32,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            image_type: ImageType::Jpg,
            quality: None,
            mirror: true,
            size_factor: 1.0,
        }
    }
}

impl CaptureFormat {
    /// Invalid parameters fall back to a plain PNG.
    pub fn sanitized(&self) -> Self {
        let quality_ok = self.quality.map_or(true, |q| (0.0..=1.0).contains(&q));
        let size_ok = self.size_factor.is_finite() && self.size_factor > 0.0;
        if quality_ok && size_ok {
            return self.clone();
        }
        log::warn!(
            "invalid capture format (quality {:?}, size factor {}), using png",
            self.quality,
            self.size_factor
        );
        Self {
            image_type: ImageType::Png,
            quality: None,
            mirror: self.mirror,
            size_factor: if size_ok { self.size_factor } else { 1.0 },
        }
    }
}

/// Encode `frame` as a `data:` URI according to `format`.
pub fn encode_data_uri(frame: &RgbImage, format: &CaptureFormat) -> Result<String> {
    let (bytes, image_type) = encode(frame, format)?;
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", image_type.mime(), payload))
}

/// Encode `frame` to raw file bytes; returns the type actually used.
pub fn encode(frame: &RgbImage, format: &CaptureFormat) -> Result<(Vec<u8>, ImageType)> {
    let format = format.sanitized();
    let mut img = if format.mirror {
        imageops::flip_horizontal(frame)
    } else {
        frame.clone()
    };
    if format.size_factor != 1.0 {
        let width = ((img.width() as f32 * format.size_factor).round() as u32).max(1);
        let height = ((img.height() as f32 * format.size_factor).round() as u32).max(1);
        img = imageops::resize(&img, width, height, imageops::FilterType::Triangle);
    }

    let mut out = Vec::new();
    match format.image_type {
        ImageType::Jpg => {
            let quality = format
                .quality
                .map(|q| ((q * 100.0).round() as u8).max(1))
                .unwrap_or(DEFAULT_JPEG_QUALITY);
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode_image(&img)
                .context("encoding jpeg capture")?;
        }
        ImageType::Png => {
            img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                .context("encoding png capture")?;
        }
    }
    Ok((out, format.image_type))
}
