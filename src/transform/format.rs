//! Image format detection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ImageError, Result};

/// Formats the transformer can read and produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// JPEG format
    #[default]
    #[serde(alias = "jpg")]
    Jpeg,
    /// PNG format
    Png,
    /// WebP format
    #[serde(rename = "webp")]
    WebP,
}

impl ImageFormat {
    /// Detects the format from a URI's file extension.
    ///
    /// Returns `Ok(None)` when the URI has no extension, and
    /// `UnsupportedFormat` when it has one we cannot handle. Query strings
    /// and fragments are ignored.
    pub fn from_uri(uri: &str) -> Result<Option<Self>> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let file_name = path.rsplit('/').next().unwrap_or(path);

        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                ext.parse().map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Detects the format from magic bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(&[0x89, 0x50, 0x4e, 0x47]) {
            return Ok(ImageFormat::Png);
        }
        if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
            return Ok(ImageFormat::Jpeg);
        }
        if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && bytes[8..12] == *b"WEBP" {
            return Ok(ImageFormat::WebP);
        }
        Err(ImageError::UnsupportedFormat(
            "unrecognised file header".to_string(),
        ))
    }

    /// MIME type used in upload payloads.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::WebP => "image/webp",
        }
    }

    /// File extension for written outputs.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
        }
    }

    /// Whether decoded pixels carry an alpha channel.
    pub fn has_alpha(&self) -> bool {
        !matches!(self, ImageFormat::Jpeg)
    }

    /// Bytes per decoded pixel.
    pub fn bytes_per_pixel(&self) -> u64 {
        if self.has_alpha() {
            4
        } else {
            3
        }
    }

    pub(crate) fn codec(&self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::WebP => image::ImageFormat::WebP,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "webp" => Ok(ImageFormat::WebP),
            other => Err(ImageError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
