//! Cache Module
//!
//! Memory-bounded image cache with compression, LRU eviction and expiry.

mod entry;
mod lru;
mod options;
mod stats;
mod store;

#[cfg(test)]
pub(crate) mod test_support;


use std::time::Duration;

// Re-export public types
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use options::{ImageOptions, Priority};
pub use stats::{hit_rate, CacheStats};
pub use store::{CachedImage, CleanupReport, ImageCache, PreloadReport};

// == Public Constants ==
/// Accountant percentage above which cleanup also evicts by LRU
pub const MEMORY_PRESSURE_PERCENT: f64 = 80.0;

/// Fraction of the max cache size LRU cleanup brings the cache down to
pub const CLEANUP_TARGET_RATIO: f64 = 0.8;

/// Smallest reduction (as a fraction of the original) worth adopting
pub const MIN_COMPRESSION_GAIN: f64 = 0.2;

// == Cache Limits ==
/// Size, count and age limits for the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Max sum of effective entry sizes, in bytes
    pub max_size: u64,
    /// Max number of entries
    pub max_entries: usize,
    /// Age after which an entry is stale
    pub expiry: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_size: 50_000_000,
            max_entries: 20,
            expiry: Duration::from_secs(30 * 60),
        }
    }
}
