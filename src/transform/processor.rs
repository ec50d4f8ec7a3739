//! Image processor: the production transformer.
//!
//! Decodes with the `image` crate, resizes to fit the configured bounds,
//! re-encodes to the target format and writes the result into a scratch
//! directory owned by the processor.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ImageError, Result};
use crate::transform::{
    can_process, needs_processing, path_to_uri, uri_to_path, CompressedImage, CompressionConfig,
    ImageFormat, ImageInfo, ImageSource, SourceHead, Transformer, TransportImage,
};

/// Lowest JPEG quality tried while squeezing under the size cap
const MIN_JPEG_QUALITY: u8 = 40;
const QUALITY_STEP: u8 = 10;

/// Transformer backed by an [`ImageSource`] and a scratch directory.
pub struct ImageProcessor {
    source: Arc<dyn ImageSource>,
    temp_dir: PathBuf,
    processing_ceiling: u64,
    /// Outputs currently being written
    pending: Mutex<HashSet<PathBuf>>,
    /// Finished outputs handed to callers
    outputs: Mutex<HashSet<PathBuf>>,
}

impl ImageProcessor {
    /// Creates a processor.
    ///
    /// # Arguments
    /// * `source` - Where source bytes are read from
    /// * `temp_dir` - Directory compressed outputs are written to
    /// * `processing_ceiling` - Largest decode footprint accepted, in bytes
    pub fn new(source: Arc<dyn ImageSource>, temp_dir: PathBuf, processing_ceiling: u64) -> Self {
        Self {
            source,
            temp_dir,
            processing_ceiling,
            pending: Mutex::new(HashSet::new()),
            outputs: Mutex::new(HashSet::new()),
        }
    }

    /// Number of finished outputs still on disk.
    #[allow(dead_code)]
    pub fn output_count(&self) -> usize {
        lock(&self.outputs).len()
    }

    async fn fetch_with_format(&self, uri: &str) -> Result<(Vec<u8>, ImageFormat)> {
        // Unsupported extensions are rejected before any I/O.
        let declared = ImageFormat::from_uri(uri)?;
        let bytes = self.source.fetch(uri).await?;
        let format = match declared {
            Some(format) => format,
            None => ImageFormat::from_bytes(&bytes)?,
        };
        Ok((bytes, format))
    }

    async fn write_output(&self, data: Vec<u8>, format: ImageFormat) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| ImageError::CompressionFailed(format!("temp dir: {}", e)))?;

        let path = self
            .temp_dir
            .join(format!("{}.{}", Uuid::new_v4(), format.extension()));
        lock(&self.pending).insert(path.clone());

        if let Err(e) = tokio::fs::write(&path, &data).await {
            lock(&self.pending).remove(&path);
            remove_quietly(&path);
            return Err(ImageError::CompressionFailed(format!("write: {}", e)));
        }

        // A release during the write already dropped our claim on the file.
        if !lock(&self.pending).remove(&path) {
            remove_quietly(&path);
            return Err(ImageError::CompressionFailed(
                "output released under memory pressure".to_string(),
            ));
        }

        lock(&self.outputs).insert(path.clone());
        Ok(path)
    }
}

#[async_trait]
impl Transformer for ImageProcessor {
    async fn estimate_size(&self, uri: &str) -> Result<ImageInfo> {
        let declared = ImageFormat::from_uri(uri)?;
        let SourceHead { byte_size, header } = self.source.head(uri).await?;
        let format = match declared {
            Some(format) => format,
            None => ImageFormat::from_bytes(&header)?,
        };
        let (width, height) =
            read_dimensions(&header).unwrap_or_else(|| approximate_dimensions(byte_size));

        debug!(
            "Estimated {}: {}x{} {} ({} bytes)",
            uri, width, height, format, byte_size
        );

        Ok(ImageInfo {
            width,
            height,
            byte_size,
            format,
        })
    }

    async fn compress(&self, uri: &str, config: &CompressionConfig) -> Result<CompressedImage> {
        let (bytes, format) = self.fetch_with_format(uri).await?;
        let byte_size = bytes.len() as u64;
        let (width, height) =
            read_dimensions(&bytes).unwrap_or_else(|| approximate_dimensions(byte_size));
        let info = ImageInfo {
            width,
            height,
            byte_size,
            format,
        };

        if !needs_processing(&info, config) {
            debug!("{} already satisfies the target, skipping re-encode", uri);
            return Ok(CompressedImage {
                uri: uri.to_string(),
                byte_size,
                width,
                height,
                format,
            });
        }

        let check = can_process(width, height, format, self.processing_ceiling);
        if !check.ok {
            return Err(ImageError::TooLargeToProcess {
                estimated: check.estimated_memory,
                ceiling: self.processing_ceiling,
            });
        }

        let config = *config;
        let (data, out_width, out_height) =
            tokio::task::spawn_blocking(move || encode(&bytes, format, &config))
                .await
                .map_err(|e| ImageError::CompressionFailed(format!("encoder task: {}", e)))??;

        let out_size = data.len() as u64;
        let path = self.write_output(data, config.format).await?;

        debug!(
            "Compressed {} from {} to {} bytes ({}x{} -> {}x{})",
            uri, byte_size, out_size, width, height, out_width, out_height
        );

        Ok(CompressedImage {
            uri: path_to_uri(&path),
            byte_size: out_size,
            width: out_width,
            height: out_height,
            format: config.format,
        })
    }

    async fn to_transport_encoding(&self, uri: &str, format: ImageFormat) -> Result<TransportImage> {
        let bytes = self.source.fetch(uri).await?;
        TransportImage::from_bytes(&bytes, format)
    }

    fn release_temp_resources(&self) {
        let pending: Vec<PathBuf> = lock(&self.pending).drain().collect();
        if pending.is_empty() {
            return;
        }
        for path in &pending {
            remove_quietly(path);
        }
        info!("Released {} in-progress compression outputs", pending.len());
    }

    fn discard(&self, uri: &str) {
        let Some(path) = uri_to_path(uri) else {
            return;
        };
        if lock(&self.outputs).remove(&path) {
            remove_quietly(&path);
            debug!("Discarded compressed output {}", path.display());
        }
    }
}

/// Reads dimensions from the image header without decoding pixels.
fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Square approximation used when the header is unreadable.
fn approximate_dimensions(byte_size: u64) -> (u32, u32) {
    let side = (byte_size as f64).sqrt().round() as u32;
    (side, side)
}

/// Decodes, fits within bounds and re-encodes. CPU bound.
fn encode(
    bytes: &[u8],
    source_format: ImageFormat,
    config: &CompressionConfig,
) -> Result<(Vec<u8>, u32, u32)> {
    let img = image::load_from_memory_with_format(bytes, source_format.codec())
        .map_err(|e| ImageError::CompressionFailed(format!("decode: {}", e)))?;

    let img = if img.width() > config.max_width || img.height() > config.max_height {
        img.resize(config.max_width, config.max_height, FilterType::Triangle)
    } else {
        img
    };
    let (width, height) = (img.width(), img.height());

    let data = match config.format {
        ImageFormat::Jpeg => encode_jpeg_within(&img, config.quality, config.max_bytes())?,
        other => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            let mut buf = Vec::new();
            rgba.write_to(&mut Cursor::new(&mut buf), other.codec())
                .map_err(|e| ImageError::CompressionFailed(format!("encode: {}", e)))?;
            buf
        }
    };

    Ok((data, width, height))
}

/// Steps JPEG quality down until the output fits `max_bytes` or the floor
/// is reached; the last attempt is returned either way.
fn encode_jpeg_within(img: &DynamicImage, start_quality: u8, max_bytes: u64) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut quality = start_quality.clamp(1, 100);

    loop {
        let mut buf = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
            .map_err(|e| ImageError::CompressionFailed(format!("encode: {}", e)))?;

        if buf.len() as u64 <= max_bytes || quality <= MIN_JPEG_QUALITY {
            return Ok(buf);
        }
        quality = quality.saturating_sub(QUALITY_STEP).max(MIN_JPEG_QUALITY);
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
