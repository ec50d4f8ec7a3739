//! Request options for cached image lookups.

use serde::{Deserialize, Serialize};

use crate::transform::{CompressionConfig, ImageFormat};

// == Priority ==
/// How eagerly an image should be compressed.
///
/// High priority images are expected on screen right away and repeatedly,
/// so they are compressed from a lower size threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Size above which compression is attempted, in bytes.
    pub fn compression_threshold(&self) -> u64 {
        match self {
            Priority::Low => 2 * 1024 * 1024,
            Priority::Normal => 1024 * 1024,
            Priority::High => 512 * 1024,
        }
    }
}

// == Image Options ==
/// Options for [`ImageCache::get_cached_image`](crate::cache::ImageCache::get_cached_image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    /// Try compressing on a miss
    pub enable_compression: bool,
    /// Slot to cache under instead of the source URI
    pub cache_key: Option<String>,
    pub priority: Priority,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub max_size_kb: Option<u64>,
    pub format: Option<ImageFormat>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            enable_compression: true,
            cache_key: None,
            priority: Priority::Normal,
            max_width: None,
            max_height: None,
            max_size_kb: None,
            format: None,
        }
    }
}

impl ImageOptions {
    /// Options with the given priority and everything else defaulted.
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Options that never compress.
    pub fn uncompressed() -> Self {
        Self {
            enable_compression: false,
            ..Self::default()
        }
    }

    /// Compression target with unset fields taken from the defaults.
    pub fn compression_config(&self) -> CompressionConfig {
        let defaults = CompressionConfig::default();
        CompressionConfig {
            max_width: self.max_width.unwrap_or(defaults.max_width),
            max_height: self.max_height.unwrap_or(defaults.max_height),
            max_size_kb: self.max_size_kb.unwrap_or(defaults.max_size_kb),
            format: self.format.unwrap_or(defaults.format),
            quality: defaults.quality,
        }
    }

    /// Whether an image of `size` bytes should be compressed.
    pub fn should_compress(&self, size: u64) -> bool {
        self.enable_compression && size > self.priority.compression_threshold()
    }
}
