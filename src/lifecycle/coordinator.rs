//! Lifecycle Coordinator
//!
//! Schedules a delayed cleanup when the application goes to the background
//! and cancels it when the application comes back.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::ImageCache;
use crate::error::ImageError;
use crate::memory::MemoryAccountant;
use crate::transform::Transformer;

// == App Visibility ==
/// Visibility state reported by the host application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppVisibility {
    #[default]
    Active,
    Inactive,
    Background,
}

impl FromStr for AppVisibility {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(AppVisibility::Active),
            "inactive" => Ok(AppVisibility::Inactive),
            "background" => Ok(AppVisibility::Background),
            other => Err(ImageError::InvalidRequest(format!(
                "unknown visibility state: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AppVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppVisibility::Active => "active",
            AppVisibility::Inactive => "inactive",
            AppVisibility::Background => "background",
        };
        f.write_str(name)
    }
}

// == Scheduled Cleanup ==
/// Handle to a deferred cleanup. Dropping it cancels the cleanup.
#[derive(Debug)]
pub struct ScheduledCleanup {
    handle: JoinHandle<()>,
}

impl ScheduledCleanup {
    /// Runs `cleanup` after `delay` on the current runtime.
    fn spawn<F>(delay: Duration, cleanup: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cleanup.await;
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledCleanup {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// == Lifecycle Coordinator ==
/// Ties visibility changes to cache cleanup.
pub struct LifecycleCoordinator {
    cache: ImageCache,
    transformer: Arc<dyn Transformer>,
    accountant: Arc<MemoryAccountant>,
    background_delay: Duration,
    visibility: Mutex<AppVisibility>,
    pending: Mutex<Option<ScheduledCleanup>>,
}

impl LifecycleCoordinator {
    // == Constructor ==
    /// Creates a coordinator in the `Active` state with nothing scheduled.
    ///
    /// # Arguments
    /// * `cache` - Cache to clean
    /// * `transformer` - Owner of temporary processing resources
    /// * `accountant` - Budget reset by a forced cleanup
    /// * `background_delay` - Wait before cleaning up in the background
    pub fn new(
        cache: ImageCache,
        transformer: Arc<dyn Transformer>,
        accountant: Arc<MemoryAccountant>,
        background_delay: Duration,
    ) -> Self {
        Self {
            cache,
            transformer,
            accountant,
            background_delay,
            visibility: Mutex::new(AppVisibility::Active),
            pending: Mutex::new(None),
        }
    }

    // == Visibility Changes ==
    /// Applies a visibility change.
    ///
    /// Going to the background schedules a cleanup, replacing any pending
    /// one. Becoming active cancels a pending cleanup. Must be called from
    /// within a tokio runtime.
    pub fn on_visibility_change(&self, state: AppVisibility) {
        let previous = std::mem::replace(&mut *lock(&self.visibility), state);
        info!("App visibility changed: {} -> {}", previous, state);

        match state {
            AppVisibility::Background => self.schedule_cleanup(),
            AppVisibility::Active => self.cancel_pending(),
            AppVisibility::Inactive => {}
        }
    }

    fn schedule_cleanup(&self) {
        let cache = self.cache.clone();
        let transformer = self.transformer.clone();
        let scheduled = ScheduledCleanup::spawn(self.background_delay, async move {
            transformer.release_temp_resources();
            let report = cache.cleanup(0).await;
            info!(
                "Background cleanup: {} expired, {} evicted",
                report.expired, report.evicted
            );
        });

        if let Some(previous) = lock(&self.pending).replace(scheduled) {
            previous.cancel();
            debug!("Replaced pending background cleanup");
        }
        debug!(
            "Background cleanup scheduled in {:?}",
            self.background_delay
        );
    }

    fn cancel_pending(&self) {
        if let Some(pending) = lock(&self.pending).take() {
            if !pending.is_finished() {
                pending.cancel();
                info!("Cancelled pending background cleanup");
            }
        }
    }

    // == Force Cleanup ==
    /// Releases temp resources, clears the cache and resets the accountant.
    /// Returns the number of entries cleared.
    pub async fn force_cleanup(&self) -> usize {
        self.transformer.release_temp_resources();
        let cleared = self.cache.clear_all().await;
        self.accountant.reset();

        info!("Forced cleanup cleared {} entries", cleared);
        cleared
    }

    // == Observation ==
    pub fn visibility(&self) -> AppVisibility {
        *lock(&self.visibility)
    }

    /// Whether a background cleanup is scheduled and has not run yet.
    pub fn has_pending_cleanup(&self) -> bool {
        lock(&self.pending)
            .as_ref()
            .is_some_and(|pending| !pending.is_finished())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
