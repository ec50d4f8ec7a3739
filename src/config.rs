//! Configuration Module
//!
//! Loads memory budgets, cache limits and service settings from
//! environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheLimits;

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Memory budget tracked by the accountant, in bytes
    pub memory_limit: u64,
    /// Fraction of the budget above which a warning is logged
    pub memory_warning_threshold: f64,
    /// Maximum total size of cached images in bytes
    pub max_cache_size: u64,
    /// Maximum number of cached images
    pub max_entries: usize,
    /// Age in seconds after which a cached image is stale
    pub expiry_secs: u64,
    /// Delay in seconds before cleanup runs once the app is backgrounded
    pub background_cleanup_delay: u64,
    /// Processing footprint ceiling for a single decode, in bytes
    pub processing_ceiling: u64,
    /// Directory for compressed image output
    pub temp_dir: PathBuf,
    /// HTTP server port
    pub server_port: u16,
    /// Expiry sweep interval in seconds
    pub cleanup_interval: u64,
    /// Memory/stats polling interval in seconds
    pub monitor_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMORY_LIMIT_BYTES` - Accountant budget (default: 100000000)
    /// - `MEMORY_WARNING_THRESHOLD` - Warning fraction (default: 0.8)
    /// - `MAX_CACHE_SIZE_BYTES` - Cache size cap, zero ignored (default: 50000000)
    /// - `MAX_CACHE_ENTRIES` - Cache entry cap, zero ignored (default: 20)
    /// - `CACHE_EXPIRY_SECS` - Expiry window (default: 1800)
    /// - `BACKGROUND_CLEANUP_DELAY_SECS` - Deferred cleanup delay (default: 30)
    /// - `PROCESSING_MEMORY_CEILING_BYTES` - Per-image ceiling (default: 52428800)
    /// - `TEMP_DIR` - Compressed output directory (default: system temp + "snapcache")
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Expiry sweep frequency in seconds (default: 60)
    /// - `MONITOR_INTERVAL` - Health polling frequency in seconds (default: 5)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            memory_limit: env_or("MEMORY_LIMIT_BYTES", defaults.memory_limit),
            memory_warning_threshold: env_or(
                "MEMORY_WARNING_THRESHOLD",
                defaults.memory_warning_threshold,
            ),
            max_cache_size: nonzero_env_or("MAX_CACHE_SIZE_BYTES", defaults.max_cache_size),
            max_entries: nonzero_env_or("MAX_CACHE_ENTRIES", defaults.max_entries),
            expiry_secs: env_or("CACHE_EXPIRY_SECS", defaults.expiry_secs),
            background_cleanup_delay: env_or(
                "BACKGROUND_CLEANUP_DELAY_SECS",
                defaults.background_cleanup_delay,
            ),
            processing_ceiling: env_or(
                "PROCESSING_MEMORY_CEILING_BYTES",
                defaults.processing_ceiling,
            ),
            temp_dir: env::var("TEMP_DIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            monitor_interval: env_or("MONITOR_INTERVAL", defaults.monitor_interval),
        }
    }

    /// Cache limits derived from this configuration.
    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_size: self.max_cache_size,
            max_entries: self.max_entries,
            expiry: Duration::from_secs(self.expiry_secs),
        }
    }

    /// Deferred cleanup delay as a Duration.
    pub fn background_delay(&self) -> Duration {
        Duration::from_secs(self.background_cleanup_delay)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_limit: 100_000_000,
            memory_warning_threshold: 0.8,
            max_cache_size: 50_000_000,
            max_entries: 20,
            expiry_secs: 30 * 60,
            background_cleanup_delay: 30,
            processing_ceiling: 50 * 1024 * 1024,
            temp_dir: env::temp_dir().join("snapcache"),
            server_port: 3000,
            cleanup_interval: 60,
            monitor_interval: 5,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like `env_or`, but a zero limit falls back to the default.
fn nonzero_env_or<T: FromStr + Default + PartialEq + Copy>(name: &str, default: T) -> T {
    let value = env_or(name, default);
    if value == T::default() {
        default
    } else {
        value
    }
}
