//! Request DTOs for the image service API
//!
//! Defines the structure of incoming HTTP request bodies and queries.

use serde::Deserialize;

use crate::cache::ImageOptions;
use crate::lifecycle::AppVisibility;
use crate::transform::ImageFormat;

/// Most URIs accepted in a single preload request
pub const MAX_PRELOAD_URIS: usize = 100;

/// Request body for POST /images
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRequest {
    /// Image reference
    pub uri: String,
    /// Compression and caching options
    #[serde(default)]
    pub options: ImageOptions,
}

impl ImageRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.uri.trim().is_empty() {
            return Some("URI cannot be empty".to_string());
        }
        if matches!(&self.options.cache_key, Some(key) if key.is_empty()) {
            return Some("Cache key cannot be empty".to_string());
        }
        None
    }
}

/// Request body for POST /images/preload
#[derive(Debug, Clone, Deserialize)]
pub struct PreloadRequest {
    pub uris: Vec<String>,
    #[serde(default)]
    pub options: ImageOptions,
}

impl PreloadRequest {
    pub fn validate(&self) -> Option<String> {
        if self.uris.is_empty() {
            return Some("At least one URI is required".to_string());
        }
        if self.uris.len() > MAX_PRELOAD_URIS {
            return Some(format!(
                "At most {} URIs can be preloaded at once",
                MAX_PRELOAD_URIS
            ));
        }
        if self.uris.iter().any(|uri| uri.trim().is_empty()) {
            return Some("URIs cannot be empty".to_string());
        }
        None
    }
}

/// Query for DELETE /images
#[derive(Debug, Clone, Deserialize)]
pub struct ClearQuery {
    pub key: String,
}

/// Request body for POST /lifecycle
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LifecycleRequest {
    pub state: AppVisibility,
}

/// Request body for POST /encode
#[derive(Debug, Clone, Deserialize)]
pub struct EncodeRequest {
    pub uri: String,
    /// Output format, JPEG unless given
    #[serde(default)]
    pub format: ImageFormat,
}
