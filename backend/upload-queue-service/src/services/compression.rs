//! Compression engine - context-sensitive image re-encoding and resizing
//!
//! Decodes a data-URL payload, picks a strategy from the upload's band and
//! origin, downscales oversized images while preserving aspect ratio, and
//! re-encodes. A codec error of any kind degrades to a passthrough of the
//! original payload with ratio 0; compression can never fail an upload.
//!
//! Uses `spawn_blocking` for the CPU-intensive work to avoid blocking the
//! async runtime.

use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CompressionConfig;
use crate::error::{AppError, Result};
use crate::models::{Priority, UploadContext};

/// Pixel count above which quality is reduced
const LARGE_PIXEL_COUNT: u64 = 2_000_000;
/// Lossy quality floor for keyboard-extension screenshots
const KEYBOARD_QUALITY_FLOOR: u8 = 70;

/// Output format chosen for a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Jpeg,
    Png,
    WebP,
}

impl TargetFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}

/// Re-encoding plan for one payload. `quality` is `None` for lossless
/// targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompressionStrategy {
    pub format: TargetFormat,
    pub quality: Option<u8>,
}

/// Outcome of one compression pass
#[derive(Debug, Clone, Serialize)]
pub struct CompressionResult {
    pub compressed_image_data: String,
    pub original_size: usize,
    pub compressed_size: usize,
    /// Percent of the original size saved, rounded; 0 on passthrough
    pub compression_ratio: u32,
    pub space_saved: usize,
    /// `None` when the payload was passed through unprocessed
    pub strategy: Option<CompressionStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompressionResult {
    /// Hand the original payload back untouched
    pub fn passthrough(context: &UploadContext, error: Option<String>) -> Self {
        Self {
            compressed_image_data: context.image_data.clone(),
            original_size: context.original_size,
            compressed_size: context.original_size,
            compression_ratio: 0,
            space_saved: 0,
            strategy: None,
            error,
        }
    }
}

/// Stateless engine; all knobs are fixed at construction
pub struct CompressionEngine {
    config: CompressionConfig,
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress an upload's payload (blocking version)
    ///
    /// Never fails: any decode or encode error is absorbed and the original
    /// payload is returned with an error annotation.
    pub fn compress(&self, context: &UploadContext) -> CompressionResult {
        match self.try_compress(context) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    upload_id = %context.upload_id,
                    error = %err,
                    "Compression failed, passing original payload through"
                );
                CompressionResult::passthrough(context, Some(err.to_string()))
            }
        }
    }

    /// Compress on the blocking thread pool
    pub async fn compress_async(self: Arc<Self>, context: UploadContext) -> Result<CompressionResult> {
        let engine = self.clone();

        tokio::task::spawn_blocking(move || Ok(engine.compress(&context)))
            .await
            .map_err(|e| AppError::Internal(format!("compression task panicked: {e}")))?
    }

    fn try_compress(&self, context: &UploadContext) -> Result<CompressionResult> {
        let body = context
            .image_data
            .split_once(',')
            .map(|(_, body)| body)
            .ok_or_else(|| AppError::Internal("payload is not a data-URL".to_string()))?;

        let original = BASE64
            .decode(body)
            .map_err(|e| AppError::Internal(format!("base64 decode failed: {e}")))?;
        let original_size = original.len();

        let source_format = image::guess_format(&original).ok();
        let img = image::load_from_memory(&original)
            .map_err(|e| AppError::Internal(format!("image decode failed: {e}")))?;
        let (width, height) = img.dimensions();

        debug!(
            upload_id = %context.upload_id,
            original_size,
            format = ?source_format,
            width,
            height,
            "Compressing image"
        );

        let strategy = self.determine_strategy(context, source_format, width, height);

        let max_dim = self.config.max_dimension;
        let img = if width > max_dim || height > max_dim {
            let (new_w, new_h) = fit_within(width, height, max_dim);
            img.resize_exact(new_w.max(1), new_h.max(1), FilterType::Triangle)
        } else {
            img
        };

        let encoded = self.encode(&img, strategy)?;

        // Re-encoding is not guaranteed to shrink; keep the original when it
        // does not
        if encoded.len() >= original_size {
            debug!(
                upload_id = %context.upload_id,
                encoded_size = encoded.len(),
                original_size,
                "Re-encoded payload is not smaller, keeping original"
            );
            let mut result = CompressionResult::passthrough(context, None);
            result.original_size = original_size;
            result.compressed_size = original_size;
            result.strategy = Some(strategy);
            return Ok(result);
        }

        let compressed_size = encoded.len();
        let compression_ratio =
            ((1.0 - compressed_size as f64 / original_size as f64) * 100.0).round() as u32;
        let compressed_image_data = format!(
            "data:{};base64,{}",
            strategy.format.mime_type(),
            BASE64.encode(&encoded)
        );

        debug!(
            upload_id = %context.upload_id,
            original_size,
            compressed_size,
            compression_ratio,
            "Image compression completed"
        );

        Ok(CompressionResult {
            compressed_image_data,
            original_size,
            compressed_size,
            compression_ratio,
            space_saved: original_size - compressed_size,
            strategy: Some(strategy),
            error: None,
        })
    }

    /// Pick the output format and quality for one payload
    pub fn determine_strategy(
        &self,
        context: &UploadContext,
        source_format: Option<ImageFormat>,
        width: u32,
        height: u32,
    ) -> CompressionStrategy {
        let mut quality = self.config.quality;

        // Latency-critical bands get lighter compression
        if context.priority <= Priority::High {
            quality = (quality + 10).min(90);
        }

        let pixel_count = width as u64 * height as u64;
        if pixel_count > LARGE_PIXEL_COUNT {
            quality = quality.saturating_sub(15).max(60);
        }

        let format = match source_format {
            // Screenshots with text stay lossless so it remains legible
            Some(ImageFormat::Png) if context.metadata.is_keyboard => {
                return CompressionStrategy {
                    format: TargetFormat::Png,
                    quality: None,
                };
            }
            Some(ImageFormat::WebP) => {
                return CompressionStrategy {
                    format: TargetFormat::WebP,
                    quality: None,
                };
            }
            _ => TargetFormat::Jpeg,
        };

        if context.metadata.is_keyboard {
            quality = quality.max(KEYBOARD_QUALITY_FLOOR);
        }

        CompressionStrategy {
            format,
            quality: Some(quality),
        }
    }

    fn encode(&self, img: &DynamicImage, strategy: CompressionStrategy) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);

        match strategy.format {
            TargetFormat::Jpeg => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                let quality = strategy.quality.unwrap_or(self.config.quality);
                rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(quality))
                    .map_err(|e| AppError::Internal(format!("jpeg encode failed: {e}")))?;
            }
            TargetFormat::Png => {
                img.write_to(&mut cursor, ImageOutputFormat::Png)
                    .map_err(|e| AppError::Internal(format!("png encode failed: {e}")))?;
            }
            TargetFormat::WebP => {
                img.write_to(&mut cursor, ImageOutputFormat::WebP)
                    .map_err(|e| AppError::Internal(format!("webp encode failed: {e}")))?;
            }
        }

        Ok(buf)
    }
}

/// Scale dimensions to fit within `max_dim`, preserving aspect ratio.
/// Callers only invoke this when at least one side exceeds the bound.
fn fit_within(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    if width >= height {
        let ratio = max_dim as f32 / width as f32;
        (max_dim, ((height as f32) * ratio).round() as u32)
    } else {
        let ratio = max_dim as f32 / height as f32;
        (((width as f32) * ratio).round() as u32, max_dim)
    }
}
