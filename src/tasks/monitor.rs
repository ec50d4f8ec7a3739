//! Health Monitor Task
//!
//! Polls cache and memory figures on a timer and publishes them to
//! subscribers through a watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::{HealthSnapshot, ImageService};

/// Spawns the health monitor.
///
/// A snapshot is taken immediately and then once per `interval`. The task
/// stops when every receiver has been dropped, or when its handle is
/// aborted.
///
/// # Returns
/// The task handle and a receiver holding the latest snapshot.
pub async fn spawn_monitor_task(
    service: Arc<ImageService>,
    interval: Duration,
) -> (JoinHandle<()>, watch::Receiver<HealthSnapshot>) {
    let (tx, rx) = watch::channel(service.snapshot().await);

    let handle = tokio::spawn(async move {
        info!("Starting health monitor with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let snapshot = service.snapshot().await;
            debug!(
                "Health: {} entries, {} cache bytes, memory {:.1}% of {}",
                snapshot.cache.entries,
                snapshot.cache.size,
                snapshot.memory.percentage,
                snapshot.memory.limit
            );

            if tx.send(snapshot).is_err() {
                debug!("No health subscribers left, stopping monitor");
                break;
            }
        }
    });

    (handle, rx)
}
