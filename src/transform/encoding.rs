//! Transport encoding for upload payloads.

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;

use crate::error::{ImageError, Result};
use crate::transform::ImageFormat;

/// Image bytes encoded for embedding in an API request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportImage {
    /// Standard base64 of the raw bytes
    pub encoded_data: String,
    /// MIME type of the encoded image
    pub mime_type: String,
    /// Number of raw (decoded) bytes
    pub byte_size: u64,
}

impl TransportImage {
    /// Encodes raw image bytes.
    ///
    /// Empty input is an `EncodingFailed` error: there is nothing an
    /// upload could usefully carry.
    pub fn from_bytes(bytes: &[u8], format: ImageFormat) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ImageError::EncodingFailed("image has no data".to_string()));
        }

        Ok(Self {
            encoded_data: general_purpose::STANDARD.encode(bytes),
            mime_type: format.mime_type().to_string(),
            byte_size: bytes.len() as u64,
        })
    }

    /// `data:` URL form used by vision APIs that accept inline images.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.encoded_data)
    }

    /// Decodes the payload back to raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(&self.encoded_data)
            .map_err(|e| ImageError::EncodingFailed(e.to_string()))
    }
}
