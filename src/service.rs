//! Image Service
//!
//! Composition root: wires the accountant, transformer, cache and
//! lifecycle coordinator together and hands them to consumers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::cache::{CacheLimits, CacheStats, ImageCache};
use crate::config::Config;
use crate::lifecycle::{AppVisibility, LifecycleCoordinator};
use crate::memory::{MemoryAccountant, MemoryUsage, PressureRelief};
use crate::transform::{FileImageSource, ImageProcessor, Transformer};

// == Health Snapshot ==
/// Point-in-time view of cache and memory health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub cache: CacheStats,
    pub memory: MemoryUsage,
    pub visibility: AppVisibility,
    pub pending_cleanup: bool,
    pub taken_at: DateTime<Utc>,
}

/// Frees transformer scratch space when the accountant hits its limit.
struct TempResourceRelief {
    transformer: Arc<dyn Transformer>,
}

impl PressureRelief for TempResourceRelief {
    fn relieve(&self) {
        self.transformer.release_temp_resources();
    }
}

// == Image Service ==
/// Shared handle to every image-management component.
pub struct ImageService {
    pub accountant: Arc<MemoryAccountant>,
    pub transformer: Arc<dyn Transformer>,
    pub cache: ImageCache,
    pub lifecycle: LifecycleCoordinator,
}

impl ImageService {
    /// Builds the service over local files, from configuration.
    pub fn from_config(config: &Config) -> Self {
        let accountant = Arc::new(MemoryAccountant::new(
            config.memory_limit,
            config.memory_warning_threshold,
        ));
        let transformer: Arc<dyn Transformer> = Arc::new(ImageProcessor::new(
            Arc::new(FileImageSource::new()),
            config.temp_dir.clone(),
            config.processing_ceiling,
        ));

        Self::from_parts(
            config.cache_limits(),
            accountant,
            transformer,
            config.background_delay(),
        )
    }

    /// Builds the service from explicit parts.
    ///
    /// # Arguments
    /// * `limits` - Cache limits
    /// * `accountant` - Memory budget, shared with any other consumers
    /// * `transformer` - Estimation and compression backend
    /// * `background_delay` - Wait before a background cleanup runs
    pub fn from_parts(
        limits: CacheLimits,
        accountant: Arc<MemoryAccountant>,
        transformer: Arc<dyn Transformer>,
        background_delay: Duration,
    ) -> Self {
        let relief = Arc::new(TempResourceRelief {
            transformer: transformer.clone(),
        });
        if !accountant.set_pressure_relief(relief) {
            debug!("Accountant already has a pressure hook, keeping it");
        }

        let cache = ImageCache::new(limits, accountant.clone(), transformer.clone());
        let lifecycle = LifecycleCoordinator::new(
            cache.clone(),
            transformer.clone(),
            accountant.clone(),
            background_delay,
        );

        Self {
            accountant,
            transformer,
            cache,
            lifecycle,
        }
    }

    /// Collects a health snapshot.
    pub async fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            cache: self.cache.stats().await,
            memory: self.accountant.usage(),
            visibility: self.lifecycle.visibility(),
            pending_cleanup: self.lifecycle.has_pending_cleanup(),
            taken_at: Utc::now(),
        }
    }
}
