//! Expiry Sweep Task
//!
//! Background task that periodically purges expired cache entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::ImageCache;

/// Spawns a background task that periodically runs a cache cleanup.
///
/// Each run purges expired entries and, when the cache or the memory
/// budget is under pressure, evicts least recently used entries.
///
/// # Arguments
/// * `cache` - Shared handle to the image cache
/// * `interval` - Time between cleanup runs
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cleanup_handle = spawn_cleanup_task(service.cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: ImageCache, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting cache cleanup task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let report = cache.cleanup(0).await;
            if report.expired > 0 || report.evicted > 0 {
                info!(
                    "Periodic cleanup: {} expired, {} evicted, {} bytes freed",
                    report.expired, report.evicted, report.freed_bytes
                );
            } else {
                debug!("Periodic cleanup: nothing to remove");
            }
        }
    })
}
