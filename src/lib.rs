//! Snapcache - memory-aware image caching
//!
//! Caches (optionally compressed) image references under a shared memory
//! budget, with LRU eviction, expiry and lifecycle-driven cleanup.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod service;
pub mod tasks;
pub mod transform;

pub use api::AppState;
pub use cache::{CachedImage, ImageCache, ImageOptions, Priority};
pub use config::Config;
pub use error::{ImageError, Result};
pub use lifecycle::{AppVisibility, LifecycleCoordinator};
pub use memory::MemoryAccountant;
pub use service::{HealthSnapshot, ImageService};
pub use tasks::{spawn_cleanup_task, spawn_monitor_task};
