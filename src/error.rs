//! Error types for the image cache
//!
//! Provides unified error handling using thiserror, plus the recovery
//! policy that decides which failures fall back to the original image.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Image Error Enum ==
/// Unified error type for the transform and cache layers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    /// Source image could not be fetched
    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    /// Source format is not one of the supported formats
    #[error("Unsupported format: {0}. Supported formats: JPEG, PNG, WebP")]
    UnsupportedFormat(String),

    /// Compression or re-encoding failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Estimated processing footprint is above the processing ceiling
    #[error("Image too large to process: needs ~{estimated} bytes, ceiling is {ceiling} bytes")]
    TooLargeToProcess { estimated: u64, ceiling: u64 },

    /// Transport encoding failed
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// == Recovery Policy ==
/// What a caller should do with a failed transform step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Keep going with the uncompressed original
    UseOriginal,
    /// Surface the error to the immediate caller
    Propagate,
}

impl ImageError {
    /// Maps an error kind to its recovery policy at a step that already
    /// holds a usable original (compression after a successful estimate).
    ///
    /// Compression failures, refusals and a source that vanished after
    /// being estimated fall back to the original; format and encoding
    /// failures always reach the caller.
    pub fn recovery(&self) -> Recovery {
        match self {
            ImageError::CompressionFailed(_)
            | ImageError::TooLargeToProcess { .. }
            | ImageError::SourceUnreachable(_) => Recovery::UseOriginal,
            _ => Recovery::Propagate,
        }
    }

    /// Whether retrying the same request might succeed.
    #[allow(dead_code)]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImageError::SourceUnreachable(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ImageError {
    fn into_response(self) -> Response {
        let status = match &self {
            ImageError::SourceUnreachable(_) => StatusCode::BAD_GATEWAY,
            ImageError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ImageError::CompressionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ImageError::TooLargeToProcess { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ImageError::EncodingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ImageError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the image cache.
pub type Result<T> = std::result::Result<T, ImageError>;
