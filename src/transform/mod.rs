//! Transform Module
//!
//! Size estimation, compression and transport encoding of images.

mod encoding;
mod format;
mod processor;
mod source;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use encoding::TransportImage;
pub use format::ImageFormat;
pub use processor::ImageProcessor;
pub use source::{
    path_to_uri, uri_to_path, FileImageSource, ImageSource, SourceHead, HEADER_READ_LIMIT,
};

// == Public Constants ==
/// Decode/resize/encode working memory relative to raw pixel bytes
pub const PROCESSING_OVERHEAD: f64 = 2.5;

// == Image Info ==
/// What the transformer learned about a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    pub format: ImageFormat,
}

// == Compression Config ==
/// Target constraints for a compressed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub max_size_kb: u64,
    pub format: ImageFormat,
    /// Starting encoder quality, 1-100 (JPEG only)
    pub quality: u8,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1920,
            max_size_kb: 1024,
            format: ImageFormat::Jpeg,
            quality: 80,
        }
    }
}

impl CompressionConfig {
    /// Size cap in bytes.
    pub fn max_bytes(&self) -> u64 {
        self.max_size_kb * 1024
    }
}

// == Compressed Image ==
/// Result of a compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    /// Reference to the compressed content
    pub uri: String,
    /// Actual size of the content behind `uri`
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

// == Processing Check ==
/// Outcome of the processing-memory pre-check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingCheck {
    pub ok: bool,
    pub estimated_memory: u64,
    pub reason: Option<String>,
}

/// Whether an image violates any of the configured constraints.
pub fn needs_processing(info: &ImageInfo, config: &CompressionConfig) -> bool {
    info.byte_size > config.max_bytes()
        || info.width > config.max_width
        || info.height > config.max_height
        || info.format != config.format
}

/// Estimates the working memory for processing an image and compares it
/// with `ceiling`.
pub fn can_process(width: u32, height: u32, format: ImageFormat, ceiling: u64) -> ProcessingCheck {
    let raw = width as u64 * height as u64 * format.bytes_per_pixel();
    let estimated_memory = (raw as f64 * PROCESSING_OVERHEAD).ceil() as u64;

    if estimated_memory > ceiling {
        ProcessingCheck {
            ok: false,
            estimated_memory,
            reason: Some(format!(
                "{}x{} {} needs ~{} bytes, ceiling is {}",
                width, height, format, estimated_memory, ceiling
            )),
        }
    } else {
        ProcessingCheck {
            ok: true,
            estimated_memory,
            reason: None,
        }
    }
}

// == Transformer ==
/// The operations the cache needs from the image layer.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Determines byte size, format and (possibly approximate) dimensions.
    async fn estimate_size(&self, uri: &str) -> Result<ImageInfo>;

    /// Produces a reference satisfying `config`.
    ///
    /// Returns the source reference unchanged when it already complies.
    /// A failure leaves no partial output behind.
    async fn compress(&self, uri: &str, config: &CompressionConfig) -> Result<CompressedImage>;

    /// Encodes the bytes behind `uri` for an upload payload.
    async fn to_transport_encoding(&self, uri: &str, format: ImageFormat) -> Result<TransportImage>;

    /// Removes temporary outputs of compressions still in progress.
    fn release_temp_resources(&self);

    /// Deletes a compressed output that is no longer referenced.
    /// References the transformer did not create are ignored.
    fn discard(&self, _uri: &str) {}
}
