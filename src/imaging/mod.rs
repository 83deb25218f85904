use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilter, PngEncoder},
    },
    imageops::FilterType,
    io::Reader as ImageReader,
    ColorType, DynamicImage, ImageEncoder, ImageFormat,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::{ImagePayload, OutputSize},
};

pub const MAX_UPLOAD_DIMENSION: u32 = 3840;
pub const UPLOAD_JPEG_QUALITY: u8 = 92;
const CROP_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportQuality {
    High,
    Good,
    Medium,
    Low,
    Lossless,
}

impl ExportQuality {
    /// JPEG quality, or `None` for PNG output.
    pub fn jpeg_quality(&self) -> Option<u8> {
        match self {
            Self::High => Some(100),
            Self::Good => Some(92),
            Self::Medium => Some(75),
            Self::Low => Some(50),
            Self::Lossless => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Lossless => "png",
            _ => "jpg",
        }
    }
}

pub fn guess_mime(bytes: &[u8]) -> AppResult<&'static str> {
    match image::guess_format(bytes)? {
        ImageFormat::Png => Ok("image/png"),
        ImageFormat::Jpeg => Ok("image/jpeg"),
        ImageFormat::WebP => Ok("image/webp"),
        other => Err(AppError::msg(format!(
            "unsupported image format: {other:?}. allowed: png/jpeg/webp"
        ))),
    }
}

pub fn image_dimensions(bytes: &[u8]) -> AppResult<(u32, u32)> {
    let dimensions = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(dimensions)
}

/// Target size keeping the aspect ratio, or `None` when already within `max`.
pub fn fit_within(width: u32, height: u32, max: u32) -> Option<(u32, u32)> {
    if width <= max && height <= max {
        return None;
    }

    let scaled = |side: u32, long: u32| -> u32 {
        ((side as f64 * max as f64 / long as f64).round() as u32).max(1)
    };

    if width > height {
        Some((max, scaled(height, width)))
    } else {
        Some((scaled(width, height), max))
    }
}

/// Shrinks oversized images to `max` on the long side and re-encodes them as JPEG.
pub fn downscale_for_upload(payload: &ImagePayload, max: u32) -> AppResult<ImagePayload> {
    let (width, height) = image_dimensions(&payload.bytes)?;
    let Some((target_width, target_height)) = fit_within(width, height, max) else {
        return Ok(payload.clone());
    };

    tracing::debug!(
        width,
        height,
        target_width,
        target_height,
        "downscaling source image before upload"
    );
    let image = image::load_from_memory(&payload.bytes)?;
    let resized = image.resize_exact(target_width, target_height, FilterType::Lanczos3);
    let bytes = encode_jpeg(&resized, UPLOAD_JPEG_QUALITY)?;
    Ok(ImagePayload::new(bytes, "image/jpeg"))
}

/// Center-crops to the target aspect ratio, then resizes to exactly `size`.
pub fn crop_and_resize(payload: &ImagePayload, size: OutputSize) -> AppResult<ImagePayload> {
    if size.width == 0 || size.height == 0 {
        return Err(AppError::msg("output size must be greater than zero"));
    }

    let image = image::load_from_memory(&payload.bytes)?;
    let (source_width, source_height) = (image.width() as f64, image.height() as f64);
    let source_ratio = source_width / source_height;
    let target_ratio = size.width as f64 / size.height as f64;

    let (mut crop_x, mut crop_y) = (0.0, 0.0);
    let (mut crop_width, mut crop_height) = (source_width, source_height);
    if source_ratio > target_ratio {
        crop_width = source_height * target_ratio;
        crop_x = (source_width - crop_width) / 2.0;
    } else if source_ratio < target_ratio {
        crop_height = source_width / target_ratio;
        crop_y = (source_height - crop_height) / 2.0;
    }

    let cropped = image.crop_imm(
        crop_x.round() as u32,
        crop_y.round() as u32,
        (crop_width.round() as u32).max(1),
        (crop_height.round() as u32).max(1),
    );
    let resized = cropped.resize_exact(size.width, size.height, FilterType::Lanczos3);
    let bytes = encode_jpeg(&resized, CROP_JPEG_QUALITY)?;
    Ok(ImagePayload::new(bytes, "image/jpeg"))
}

pub fn parse_output_size(value: &str) -> AppResult<OutputSize> {
    let invalid = || AppError::msg(format!("invalid output size {value:?}, expected WIDTHxHEIGHT"));
    let (width, height) = value
        .trim()
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(invalid)?;
    let width = width.trim().parse::<u32>().map_err(|_| invalid())?;
    let height = height.trim().parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }

    Ok(OutputSize { width, height })
}

pub fn export_image(payload: &ImagePayload, quality: ExportQuality) -> AppResult<ImagePayload> {
    let image = image::load_from_memory(&payload.bytes)?;
    match quality.jpeg_quality() {
        Some(jpeg_quality) => Ok(ImagePayload::new(
            encode_jpeg(&image, jpeg_quality)?,
            "image/jpeg",
        )),
        None => {
            let rgba = image.into_rgba8();
            let bytes = encode_png_optimized(rgba.as_raw(), rgba.width(), rgba.height())?;
            Ok(ImagePayload::new(bytes, "image/png"))
        }
    }
}

pub fn export_image_to_path(
    payload: &ImagePayload,
    quality: ExportQuality,
    destination_path: &Path,
) -> AppResult<PathBuf> {
    let mut output_path = destination_path.to_path_buf();
    if output_path.extension().is_none() {
        output_path.set_extension(quality.extension());
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let exported = export_image(payload, quality)?;
    fs::write(&output_path, exported.bytes)?;
    Ok(output_path)
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> AppResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut jpeg_bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg_bytes, quality.clamp(1, 100))
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|error| AppError::msg(format!("failed to encode jpeg: {error}")))?;
    Ok(jpeg_bytes)
}

pub fn encode_png_optimized(rgba: &[u8], width: u32, height: u32) -> AppResult<Vec<u8>> {
    let mut png_bytes = Vec::new();
    {
        let encoder = PngEncoder::new_with_quality(
            &mut png_bytes,
            CompressionType::Best,
            PngFilter::Adaptive,
        );
        encoder
            .write_image(rgba, width, height, ColorType::Rgba8)
            .map_err(|error| AppError::msg(format!("failed to encode png: {error}")))?;
    }

    let mut options = oxipng::Options::from_preset(3);
    options.strip = oxipng::StripChunks::Safe;

    oxipng::optimize_from_memory(&png_bytes, &options)
        .map_err(|error| AppError::msg(format!("failed to optimize png: {error}")))
}
