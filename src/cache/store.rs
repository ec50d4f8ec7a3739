//! Image Cache Module
//!
//! Coordinates lookups, memory-budget checks, compression and eviction.
//! The entry map and the memory accountant are always mutated together.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{
    hit_rate, CacheEntry, CacheLimits, CacheStats, ImageOptions, LruTracker, Priority,
    CLEANUP_TARGET_RATIO, MEMORY_PRESSURE_PERCENT, MIN_COMPRESSION_GAIN,
};
use crate::error::{ImageError, Recovery, Result};
use crate::memory::MemoryAccountant;
use crate::transform::Transformer;

// == Results ==
/// Reference returned to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedImage {
    /// Compressed reference if adopted, the original otherwise
    pub uri: String,
    /// Bytes behind `uri`
    pub size: u64,
    /// Whether this came from a live entry
    pub from_cache: bool,
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
    pub freed_bytes: u64,
}

/// Outcome of a preload batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub loaded: usize,
    pub failed: usize,
}

// == Cache State ==
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    evictions: u64,
    expirations: u64,
}

impl CacheState {
    fn total_size(&self) -> u64 {
        self.entries.values().map(CacheEntry::effective_size).sum()
    }
}

struct Inner {
    state: RwLock<CacheState>,
    /// Per-key guards so concurrent misses for one key share a single load
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    accountant: Arc<MemoryAccountant>,
    transformer: Arc<dyn Transformer>,
    limits: CacheLimits,
}

// == Image Cache ==
/// Shared handle to the image cache. Clones refer to the same cache.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Inner>,
}

impl ImageCache {
    // == Constructor ==
    /// Creates an empty cache.
    ///
    /// # Arguments
    /// * `limits` - Size, count and expiry limits
    /// * `accountant` - Memory budget shared with other consumers
    /// * `transformer` - Estimation and compression backend
    pub fn new(
        limits: CacheLimits,
        accountant: Arc<MemoryAccountant>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(CacheState::default()),
                inflight: Mutex::new(HashMap::new()),
                accountant,
                transformer,
                limits,
            }),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.inner.limits
    }

    pub fn accountant(&self) -> &Arc<MemoryAccountant> {
        &self.inner.accountant
    }

    // == Get Cached Image ==
    /// Returns a (possibly compressed) reference for `uri`, loading it on a miss.
    ///
    /// The slot is `options.cache_key` or `uri`. When the memory budget
    /// cannot fit the image even after cleanup, the original reference is
    /// returned uncached. Size-estimation failures are returned; failures
    /// while compressing fall back to the original.
    pub async fn get_cached_image(&self, uri: &str, options: &ImageOptions) -> Result<CachedImage> {
        // The load runs on its own task so that dropping this future never
        // strands tracked memory or an in-flight slot.
        let cache = self.clone();
        let uri = uri.to_string();
        let options = options.clone();
        let handle = tokio::spawn(async move { cache.load_coalesced(&uri, &options).await });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(ImageError::CompressionFailed(format!(
                "load task cancelled: {}",
                e
            ))),
        }
    }

    async fn load_coalesced(&self, uri: &str, options: &ImageOptions) -> Result<CachedImage> {
        let key = options.cache_key.as_deref().unwrap_or(uri).to_string();

        let slot = {
            let mut inflight = self.inner.inflight.lock().await;
            inflight.entry(key.clone()).or_default().clone()
        };

        let result = {
            let _guard = slot.lock().await;
            self.load(&key, uri, options).await
        };

        let mut inflight = self.inner.inflight.lock().await;
        // Only the map and this call hold the slot: nobody is waiting on it.
        if Arc::strong_count(&slot) == 2 {
            inflight.remove(&key);
        }

        result
    }

    async fn load(&self, key: &str, uri: &str, options: &ImageOptions) -> Result<CachedImage> {
        let expiry = self.inner.limits.expiry;

        // 1. Lookup
        {
            let mut state = self.inner.state.write().await;
            let CacheState { entries, lru, .. } = &mut *state;
            if let Some(entry) = entries.get_mut(key) {
                if !entry.is_expired(expiry) {
                    entry.touch();
                    lru.touch(key);
                    debug!("Cache hit for {} (accesses: {})", key, entry.access_count);
                    return Ok(CachedImage {
                        uri: entry.effective_uri().to_string(),
                        size: entry.effective_size(),
                        from_cache: true,
                    });
                }
                debug!("Cache entry for {} expired", key);
            }
        }

        // 2. Budget check
        let info = self.inner.transformer.estimate_size(uri).await?;
        let estimated = info.byte_size;
        let accountant = &self.inner.accountant;

        if !accountant.can_allocate(estimated) {
            let report = self.cleanup(estimated).await;
            if !accountant.can_allocate(estimated) {
                warn!(
                    "Not enough memory to cache {} ({} bytes, freed {}), serving original",
                    uri, estimated, report.freed_bytes
                );
                return Ok(CachedImage {
                    uri: uri.to_string(),
                    size: estimated,
                    from_cache: false,
                });
            }
        }

        // 3. Accounting
        accountant.track_usage(estimated);

        // 4. Optional compression
        let mut entry = CacheEntry::new(uri, estimated);
        if options.should_compress(estimated) {
            match self
                .inner
                .transformer
                .compress(uri, &options.compression_config())
                .await
            {
                Ok(compressed) if compressed.uri == uri => {
                    debug!("{} needed no compression", uri);
                }
                Ok(compressed) if worth_adopting(estimated, compressed.byte_size) => {
                    accountant.release_memory(estimated - compressed.byte_size);
                    debug!(
                        "Compressed {} from {} to {} bytes",
                        uri, estimated, compressed.byte_size
                    );
                    entry = entry.with_compressed(compressed.uri, compressed.byte_size);
                }
                Ok(compressed) => {
                    debug!(
                        "Compression of {} saved too little ({} -> {} bytes), keeping original",
                        uri, estimated, compressed.byte_size
                    );
                    self.inner.transformer.discard(&compressed.uri);
                }
                Err(e) => match e.recovery() {
                    Recovery::UseOriginal => {
                        warn!("Compression of {} failed, using original: {}", uri, e);
                    }
                    Recovery::Propagate => {
                        accountant.release_memory(estimated);
                        return Err(e);
                    }
                },
            }
        }

        // An entry that could never fit would be evicted on insertion.
        if entry.effective_size() > self.inner.limits.max_size {
            accountant.release_memory(entry.effective_size());
            if let Some(compressed) = &entry.compressed_uri {
                self.inner.transformer.discard(compressed);
            }
            warn!(
                "{} ({} bytes) exceeds the cache size limit, serving uncached",
                uri, entry.original_size
            );
            return Ok(CachedImage {
                uri: uri.to_string(),
                size: entry.original_size,
                from_cache: false,
            });
        }

        let original_size = entry.original_size;
        let result = CachedImage {
            uri: entry.effective_uri().to_string(),
            size: entry.effective_size(),
            from_cache: false,
        };

        // 5. Insert, replacing any prior entry
        let mut state = self.inner.state.write().await;
        if self.remove_entry(&mut state, key).is_some() {
            debug!("Replaced existing entry for {}", key);
        }
        state.entries.insert(key.to_string(), entry);
        state.lru.touch(key);

        // 6. Limits
        self.enforce_limits_locked(&mut state);

        // Eviction of the new entry already discarded its compressed output.
        if !state.entries.contains_key(key) {
            warn!("{} was evicted on insertion, serving uncached", uri);
            return Ok(CachedImage {
                uri: uri.to_string(),
                size: original_size,
                from_cache: false,
            });
        }

        Ok(result)
    }

    // == Preload ==
    /// Loads every URI at low priority. Failures are logged and skipped.
    pub async fn preload_images(&self, uris: Vec<String>, options: &ImageOptions) -> PreloadReport {
        let options = ImageOptions {
            priority: Priority::Low,
            ..options.clone()
        };

        let mut tasks = JoinSet::new();
        for uri in uris {
            let cache = self.clone();
            let options = options.clone();
            tasks.spawn(async move {
                let result = cache.get_cached_image(&uri, &options).await;
                (uri, result)
            });
        }

        let mut report = PreloadReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => report.loaded += 1,
                Ok((uri, Err(e))) => {
                    warn!("Preload of {} failed: {}", uri, e);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("Preload task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Preload finished: {} loaded, {} failed",
            report.loaded, report.failed
        );
        report
    }

    // == Clear ==
    /// Removes one entry, releasing its memory. Returns whether it existed.
    pub async fn clear_image(&self, key: &str) -> bool {
        let mut state = self.inner.state.write().await;
        self.remove_entry(&mut state, key).is_some()
    }

    /// Removes every entry, releasing all their memory. Returns the count.
    pub async fn clear_all(&self) -> usize {
        let mut state = self.inner.state.write().await;
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in &keys {
            self.remove_entry(&mut state, key);
        }
        state.lru.clear();

        info!("Cleared {} cached images", keys.len());
        keys.len()
    }

    // == Cleanup ==
    /// Purges expired entries, then evicts by LRU under pressure.
    ///
    /// Pressure means the cache plus `required_bytes` would exceed the max
    /// cache size, or the accountant is above 80% of its budget. Eviction
    /// continues until at least `required_bytes` have been freed and the
    /// cache is at most 80% of its max size.
    pub async fn cleanup(&self, required_bytes: u64) -> CleanupReport {
        let mut state = self.inner.state.write().await;
        let mut report = CleanupReport::default();
        let expiry = self.inner.limits.expiry;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(expiry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = self.remove_entry(&mut state, &key) {
                report.expired += 1;
                report.freed_bytes += entry.effective_size();
                state.expirations += 1;
            }
        }

        let max_size = self.inner.limits.max_size;
        let over_size = state.total_size().saturating_add(required_bytes) > max_size;
        let under_pressure = self.inner.accountant.usage().percentage > MEMORY_PRESSURE_PERCENT;

        if over_size || under_pressure {
            let target = (max_size as f64 * CLEANUP_TARGET_RATIO) as u64;
            while report.freed_bytes < required_bytes || state.total_size() > target {
                let Some(key) = state.lru.oldest().map(str::to_string) else {
                    break;
                };
                if let Some(entry) = self.remove_entry(&mut state, &key) {
                    report.evicted += 1;
                    report.freed_bytes += entry.effective_size();
                    state.evictions += 1;
                }
            }
        }

        if report.expired > 0 || report.evicted > 0 {
            info!(
                "Cleanup: {} expired, {} evicted, {} bytes freed",
                report.expired, report.evicted, report.freed_bytes
            );
        } else {
            debug!("Cleanup: nothing to remove");
        }
        report
    }

    // == Enforce Limits ==
    /// Evicts least recently used entries until count and size fit.
    /// Returns the number evicted.
    pub async fn enforce_limits(&self) -> usize {
        let mut state = self.inner.state.write().await;
        self.enforce_limits_locked(&mut state)
    }

    fn enforce_limits_locked(&self, state: &mut CacheState) -> usize {
        let limits = self.inner.limits;
        let mut evicted = 0;

        while state.entries.len() > limits.max_entries || state.total_size() > limits.max_size {
            let Some(key) = state.lru.oldest().map(str::to_string) else {
                break;
            };
            if self.remove_entry(state, &key).is_some() {
                debug!("Evicted least recently used entry {}", key);
                state.evictions += 1;
                evicted += 1;
            }
        }
        evicted
    }

    /// Releases an entry's accounting and compressed output, then drops it.
    fn remove_entry(&self, state: &mut CacheState, key: &str) -> Option<CacheEntry> {
        let entry = state.entries.get(key)?;
        self.inner.accountant.release_memory(entry.effective_size());
        if let Some(compressed) = &entry.compressed_uri {
            self.inner.transformer.discard(compressed);
        }

        state.lru.remove(key);
        state.entries.remove(key)
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let state = self.inner.state.read().await;
        CacheStats {
            size: state.total_size(),
            entries: state.entries.len(),
            memory_usage: self.inner.accountant.current(),
            hit_rate: hit_rate(state.entries.values().map(|e| e.access_count)),
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }

    // == Inspection ==
    /// Snapshot of the entry at `key`, expired or not.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.state.read().await.entries.get(key).cloned()
    }

    /// Keys from least to most recently accessed.
    pub async fn keys_by_recency(&self) -> Vec<String> {
        let state = self.inner.state.read().await;
        state.lru.keys().map(str::to_string).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.read().await.entries.is_empty()
    }
}

/// Whether `compressed` is at least [`MIN_COMPRESSION_GAIN`] smaller than `original`.
fn worth_adopting(original: u64, compressed: u64) -> bool {
    compressed < original && (compressed as f64) <= original as f64 * (1.0 - MIN_COMPRESSION_GAIN)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::{
        cache_with, scenario_limits, CompressOutcome, StubTransformer,
    };
    use crate::error::ImageError;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const MB: u64 = 1_000_000;

    #[test]
    fn test_adoption_threshold() {
        assert!(!worth_adopting(1_000_000, 850_000));
        assert!(worth_adopting(1_000_000, 800_000));
        assert!(worth_adopting(1_000_000, 700_000));
        assert!(!worth_adopting(1_000_000, 1_200_000));
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let stub = StubTransformer::new().with_image("img-1", 2 * MB);
        let (cache, accountant, _) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions::uncompressed();

        let first = cache.get_cached_image("img-1", &options).await.unwrap();
        assert_eq!(
            first,
            CachedImage {
                uri: "img-1".to_string(),
                size: 2 * MB,
                from_cache: false
            }
        );

        let second = cache.get_cached_image("img-1", &options).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.size, 2 * MB);

        let entry = cache.entry("img-1").await.unwrap();
        assert_eq!(entry.access_count, 2);
        assert_eq!(accountant.current(), 2 * MB);
    }

    #[tokio::test]
    async fn test_hit_does_not_touch_accountant_or_transformer() {
        let stub = StubTransformer::new().with_image("a", MB);
        let (cache, accountant, stub) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions::default();

        cache.get_cached_image("a", &options).await.unwrap();
        let usage = accountant.current();
        cache.get_cached_image("a", &options).await.unwrap();

        assert_eq!(accountant.current(), usage);
        assert_eq!(stub.estimates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_key_override_aliases_slot() {
        let stub = StubTransformer::new()
            .with_image("a", MB)
            .with_image("b", 2 * MB);
        let (cache, accountant, _) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions {
            cache_key: Some("meal".to_string()),
            ..ImageOptions::uncompressed()
        };

        cache.get_cached_image("a", &options).await.unwrap();
        let hit = cache.get_cached_image("b", &options).await.unwrap();

        assert!(hit.from_cache);
        assert_eq!(hit.uri, "a");
        assert_eq!(cache.len().await, 1);
        assert_eq!(accountant.current(), MB);
    }

    #[tokio::test]
    async fn test_small_compression_gain_not_adopted() {
        let stub = StubTransformer::new()
            .with_image("photo", MB)
            .with_compression("photo", CompressOutcome::Size(850_000));
        let (cache, accountant, stub) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions::with_priority(Priority::High);

        let result = cache.get_cached_image("photo", &options).await.unwrap();
        assert_eq!(result.uri, "photo");
        assert_eq!(result.size, MB);

        let entry = cache.entry("photo").await.unwrap();
        assert_eq!(entry.compressed_size, None);
        assert_eq!(entry.compressed_uri, None);
        assert_eq!(accountant.current(), MB);
        assert_eq!(
            *stub.discarded.lock().unwrap(),
            vec![StubTransformer::compressed_uri("photo")]
        );
    }

    #[tokio::test]
    async fn test_large_compression_gain_adopted() {
        let stub = StubTransformer::new()
            .with_image("photo", MB)
            .with_compression("photo", CompressOutcome::Size(700_000));
        let (cache, accountant, _) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions::with_priority(Priority::High);

        let result = cache.get_cached_image("photo", &options).await.unwrap();
        assert_eq!(result.uri, StubTransformer::compressed_uri("photo"));
        assert_eq!(result.size, 700_000);

        let entry = cache.entry("photo").await.unwrap();
        assert_eq!(entry.compressed_size, Some(700_000));
        assert_eq!(entry.original_size, MB);
        assert_eq!(accountant.current(), 700_000);

        let hit = cache.get_cached_image("photo", &options).await.unwrap();
        assert_eq!(hit.size, 700_000);
        assert!(hit.from_cache);
    }

    #[tokio::test]
    async fn test_below_priority_threshold_skips_compression() {
        let stub = StubTransformer::new()
            .with_image("photo", MB)
            .with_compression("photo", CompressOutcome::Size(100_000));
        let (cache, _, stub) = cache_with(stub, 100 * MB, scenario_limits());

        // 1 MB is under the low-priority threshold
        let options = ImageOptions::with_priority(Priority::Low);
        let result = cache.get_cached_image("photo", &options).await.unwrap();

        assert_eq!(result.size, MB);
        assert_eq!(stub.compressions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compression_failure_falls_back() {
        let stub = StubTransformer::new()
            .with_image("photo", 3 * MB)
            .with_compression(
                "photo",
                CompressOutcome::Fail(ImageError::CompressionFailed("decoder".into())),
            );
        let (cache, accountant, _) = cache_with(stub, 100 * MB, scenario_limits());

        let result = cache
            .get_cached_image("photo", &ImageOptions::default())
            .await
            .unwrap();
        assert_eq!(result.uri, "photo");
        assert_eq!(result.size, 3 * MB);
        assert_eq!(accountant.current(), 3 * MB);
    }

    #[tokio::test]
    async fn test_propagated_compression_error_releases_accounting() {
        let stub = StubTransformer::new()
            .with_image("photo", 3 * MB)
            .with_compression(
                "photo",
                CompressOutcome::Fail(ImageError::UnsupportedFormat("tiff".into())),
            );
        let (cache, accountant, _) = cache_with(stub, 100 * MB, scenario_limits());

        let result = cache
            .get_cached_image("photo", &ImageOptions::default())
            .await;
        assert!(matches!(result, Err(ImageError::UnsupportedFormat(_))));
        assert_eq!(accountant.current(), 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_estimate_failure_propagates() {
        let (cache, accountant, _) =
            cache_with(StubTransformer::new(), 100 * MB, scenario_limits());

        let result = cache
            .get_cached_image("missing", &ImageOptions::default())
            .await;
        assert!(matches!(result, Err(ImageError::SourceUnreachable(_))));
        assert_eq!(accountant.current(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_memory_serves_original() {
        let stub = StubTransformer::new().with_image("huge", 20 * MB);
        let (cache, accountant, _) = cache_with(stub, 10 * MB, scenario_limits());

        let result = cache
            .get_cached_image("huge", &ImageOptions::default())
            .await
            .unwrap();
        assert_eq!(
            result,
            CachedImage {
                uri: "huge".to_string(),
                size: 20 * MB,
                from_cache: false
            }
        );
        assert!(cache.is_empty().await);
        assert_eq!(accountant.current(), 0);
    }

    #[tokio::test]
    async fn test_budget_pressure_evicts_to_make_room() {
        let stub = StubTransformer::new()
            .with_image("a", 4 * MB)
            .with_image("b", 4 * MB)
            .with_image("c", 4 * MB);
        let limits = CacheLimits {
            max_size: 10 * MB,
            ..scenario_limits()
        };
        let (cache, accountant, _) = cache_with(stub, 10 * MB, limits);
        let options = ImageOptions::uncompressed();

        cache.get_cached_image("a", &options).await.unwrap();
        cache.get_cached_image("b", &options).await.unwrap();
        let result = cache.get_cached_image("c", &options).await.unwrap();

        assert!(!result.from_cache);
        assert!(cache.entry("a").await.is_none(), "oldest entry evicted");
        assert!(cache.entry("c").await.is_some());
        assert!(accountant.current() <= 10 * MB);
    }

    #[tokio::test]
    async fn test_overwrite_releases_prior_accounting() {
        let stub = StubTransformer::new().with_image("a", MB);
        let limits = CacheLimits {
            expiry: Duration::from_millis(50),
            ..scenario_limits()
        };
        let (cache, accountant, _) = cache_with(stub, 100 * MB, limits);
        let options = ImageOptions::uncompressed();

        cache.get_cached_image("a", &options).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Expired: reloaded and overwritten in place
        let result = cache.get_cached_image("a", &options).await.unwrap();
        assert!(!result.from_cache);
        assert_eq!(cache.len().await, 1);
        assert_eq!(accountant.current(), MB);
        assert_eq!(cache.entry("a").await.unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_max_entries_evicts_least_recent() {
        let mut stub = StubTransformer::new();
        for i in 0..21 {
            stub = stub.with_image(&format!("img-{}", i), MB);
        }
        let (cache, accountant, _) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions::uncompressed();

        for i in 0..20 {
            cache
                .get_cached_image(&format!("img-{}", i), &options)
                .await
                .unwrap();
        }
        // Refresh img-0 so img-1 becomes the least recent
        cache.get_cached_image("img-0", &options).await.unwrap();
        cache.get_cached_image("img-20", &options).await.unwrap();

        assert_eq!(cache.len().await, 20);
        assert!(cache.entry("img-1").await.is_none());
        assert!(cache.entry("img-0").await.is_some());
        assert_eq!(accountant.current(), 20 * MB);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_max_size_evicts_until_fits() {
        let stub = StubTransformer::new()
            .with_image("a", 3 * MB)
            .with_image("b", 3 * MB)
            .with_image("c", 3 * MB);
        let limits = CacheLimits {
            max_size: 7 * MB,
            ..scenario_limits()
        };
        let (cache, accountant, _) = cache_with(stub, 100 * MB, limits);
        let options = ImageOptions::uncompressed();

        for key in ["a", "b", "c"] {
            cache.get_cached_image(key, &options).await.unwrap();
        }

        assert_eq!(cache.keys_by_recency().await, vec!["b", "c"]);
        assert_eq!(cache.stats().await.size, 6 * MB);
        assert_eq!(accountant.current(), 6 * MB);
    }

    #[tokio::test]
    async fn test_entry_evicted_on_insertion_is_served_uncached() {
        let stub = StubTransformer::new()
            .with_image("a", 3 * MB)
            .with_compression("a", CompressOutcome::Size(MB));
        let limits = CacheLimits {
            max_entries: 0,
            ..scenario_limits()
        };
        let (cache, accountant, stub) = cache_with(stub, 100 * MB, limits);

        let result = cache
            .get_cached_image("a", &ImageOptions::default())
            .await
            .unwrap();

        assert_eq!(result.uri, "a");
        assert_eq!(result.size, 3 * MB);
        assert!(!result.from_cache);
        assert!(cache.is_empty().await);
        assert_eq!(accountant.current(), 0);
        assert_eq!(
            *stub.discarded.lock().unwrap(),
            vec![StubTransformer::compressed_uri("a")]
        );
    }

    #[tokio::test]
    async fn test_abandoned_load_still_settles_accounting() {
        let stub = StubTransformer::new()
            .with_image("a.jpg", 3 * MB)
            .with_compression("a.jpg", CompressOutcome::Size(MB))
            .with_compress_delay(Duration::from_millis(200));
        let (cache, accountant, _stub) = cache_with(stub, 100 * MB, scenario_limits());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            cache.get_cached_image("a.jpg", &ImageOptions::default()),
        )
        .await;
        assert!(abandoned.is_err(), "compression should outlast the timeout");

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(accountant.current(), cache.stats().await.size);
        assert_eq!(accountant.current(), MB);
        assert!(cache.entry("a.jpg").await.is_some());
        assert!(cache.inner.inflight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_entry_larger_than_cache_is_served_uncached() {
        let stub = StubTransformer::new()
            .with_image("small", MB)
            .with_image("huge", 8 * MB)
            .with_compression("huge", CompressOutcome::Size(6 * MB));
        let limits = CacheLimits {
            max_size: 5 * MB,
            ..scenario_limits()
        };
        let (cache, accountant, stub) = cache_with(stub, 100 * MB, limits);

        cache
            .get_cached_image("small", &ImageOptions::uncompressed())
            .await
            .unwrap();
        let result = cache
            .get_cached_image("huge", &ImageOptions::default())
            .await
            .unwrap();

        assert_eq!(result.uri, "huge");
        assert_eq!(result.size, 8 * MB);
        assert!(cache.entry("huge").await.is_none());
        assert!(cache.entry("small").await.is_some(), "others untouched");
        assert_eq!(accountant.current(), MB);
        assert_eq!(
            *stub.discarded.lock().unwrap(),
            vec![StubTransformer::compressed_uri("huge")]
        );
    }

    #[tokio::test]
    async fn test_clear_image() {
        let stub = StubTransformer::new()
            .with_image("a", MB)
            .with_image("b", 2 * MB);
        let (cache, accountant, _) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions::uncompressed();

        cache.get_cached_image("a", &options).await.unwrap();
        cache.get_cached_image("b", &options).await.unwrap();

        assert!(cache.clear_image("a").await);
        assert!(!cache.clear_image("a").await, "second clear is a no-op");
        assert_eq!(cache.len().await, 1);
        assert_eq!(accountant.current(), 2 * MB);
    }

    #[tokio::test]
    async fn test_clear_all_releases_everything() {
        let stub = StubTransformer::new()
            .with_image("a", 3 * MB)
            .with_compression("a", CompressOutcome::Size(MB))
            .with_image("b", 2 * MB);
        let (cache, accountant, stub) = cache_with(stub, 100 * MB, scenario_limits());

        cache
            .get_cached_image("a", &ImageOptions::default())
            .await
            .unwrap();
        cache
            .get_cached_image("b", &ImageOptions::uncompressed())
            .await
            .unwrap();

        assert_eq!(cache.clear_all().await, 2);
        assert!(cache.is_empty().await);
        assert_eq!(accountant.current(), 0);
        assert!(stub
            .discarded
            .lock()
            .unwrap()
            .contains(&StubTransformer::compressed_uri("a")));
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_a_hit_and_is_purged() {
        let stub = StubTransformer::new()
            .with_image("old", MB)
            .with_image("new", MB);
        let limits = CacheLimits {
            expiry: Duration::from_millis(100),
            ..scenario_limits()
        };
        let (cache, accountant, _) = cache_with(stub, 100 * MB, limits);
        let options = ImageOptions::uncompressed();

        cache.get_cached_image("old", &options).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        cache.get_cached_image("new", &options).await.unwrap();

        let report = cache.cleanup(0).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.evicted, 0);
        assert!(cache.entry("old").await.is_none());
        assert!(cache.entry("new").await.is_some());
        assert_eq!(accountant.current(), MB);
        assert_eq!(cache.stats().await.expirations, 1);
    }

    #[tokio::test]
    async fn test_cleanup_without_pressure_keeps_entries() {
        let stub = StubTransformer::new().with_image("a", MB);
        let (cache, _, _) = cache_with(stub, 100 * MB, scenario_limits());
        cache
            .get_cached_image("a", &ImageOptions::uncompressed())
            .await
            .unwrap();

        let report = cache.cleanup(0).await;
        assert_eq!(report, CleanupReport::default());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_with_required_bytes_evicts_lru() {
        let stub = StubTransformer::new()
            .with_image("a", 4 * MB)
            .with_image("b", 4 * MB)
            .with_image("c", 4 * MB);
        let limits = CacheLimits {
            max_size: 15 * MB,
            ..scenario_limits()
        };
        let (cache, accountant, _) = cache_with(stub, 100 * MB, limits);
        let options = ImageOptions::uncompressed();
        for key in ["a", "b", "c"] {
            cache.get_cached_image(key, &options).await.unwrap();
        }

        // 12 MB + 6 MB > 15 MB: evict until 6 MB freed and size <= 12 MB
        let report = cache.cleanup(6 * MB).await;
        assert_eq!(report.evicted, 2);
        assert_eq!(report.freed_bytes, 8 * MB);
        assert_eq!(cache.keys_by_recency().await, vec!["c"]);
        assert_eq!(accountant.current(), 4 * MB);
    }

    #[tokio::test]
    async fn test_cleanup_under_memory_pressure_trims_to_target() {
        let stub = StubTransformer::new()
            .with_image("a", 4 * MB)
            .with_image("b", 4 * MB);
        let limits = CacheLimits {
            max_size: 9 * MB,
            ..scenario_limits()
        };
        // 8 MB of a 9 MB budget is ~89%
        let (cache, _, _) = cache_with(stub, 9 * MB, limits);
        let options = ImageOptions::uncompressed();
        cache.get_cached_image("a", &options).await.unwrap();
        cache.get_cached_image("b", &options).await.unwrap();

        let report = cache.cleanup(0).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(cache.keys_by_recency().await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_stats_hit_rate() {
        let stub = StubTransformer::new()
            .with_image("a", MB)
            .with_image("b", MB);
        let (cache, _, _) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions::uncompressed();

        cache.get_cached_image("a", &options).await.unwrap();
        cache.get_cached_image("a", &options).await.unwrap();
        cache.get_cached_image("a", &options).await.unwrap();
        cache.get_cached_image("b", &options).await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.size, 2 * MB);
        assert_eq!(stats.memory_usage, 2 * MB);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_preload_isolates_failures() {
        let stub = StubTransformer::new()
            .with_image("a", MB)
            .with_image("b", MB);
        let (cache, _, _) = cache_with(stub, 100 * MB, scenario_limits());

        let report = cache
            .preload_images(
                vec!["a".to_string(), "missing".to_string(), "b".to_string()],
                &ImageOptions::default(),
            )
            .await;

        assert_eq!(report, PreloadReport { loaded: 2, failed: 1 });
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_preload_uses_low_priority() {
        // 1.5 MB compresses at normal priority but not at low
        let stub = StubTransformer::new()
            .with_image("a", 1_500_000)
            .with_compression("a", CompressOutcome::Size(100_000));
        let (cache, _, stub) = cache_with(stub, 100 * MB, scenario_limits());

        cache
            .preload_images(vec!["a".to_string()], &ImageOptions::default())
            .await;
        assert_eq!(stub.compressions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_load() {
        let stub = StubTransformer::new()
            .with_image("a", MB)
            .with_delay(Duration::from_millis(50));
        let (cache, accountant, stub) = cache_with(stub, 100 * MB, scenario_limits());
        let options = ImageOptions::uncompressed();

        let (first, second) = tokio::join!(
            cache.get_cached_image("a", &options),
            cache.get_cached_image("a", &options)
        );
        let mut from_cache = [first.unwrap().from_cache, second.unwrap().from_cache];
        from_cache.sort();

        assert_eq!(from_cache, [false, true]);
        assert_eq!(stub.estimates.load(Ordering::SeqCst), 1);
        assert_eq!(accountant.current(), MB);
        assert!(cache.inner.inflight.lock().await.is_empty());
    }
}
