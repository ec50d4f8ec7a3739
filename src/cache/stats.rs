//! Cache Statistics Module
//!
//! Size, occupancy and hit-rate figures for the image cache.

use serde::Serialize;

// == Cache Stats ==
/// Snapshot of cache health.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Sum of effective sizes of live entries, in bytes
    pub size: u64,
    /// Number of live entries
    pub entries: usize,
    /// Accountant's current usage, in bytes
    pub memory_usage: u64,
    /// Hits over accesses of live entries
    pub hit_rate: f64,
    /// Entries removed by LRU eviction
    pub evictions: u64,
    /// Entries removed because they expired
    pub expirations: u64,
}

// == Hit Rate ==
/// Computes the hit rate from per-entry access counts.
///
/// The first access to each live entry is its miss, so the rate is
/// `sum(count - 1) / sum(count)`, or 0.0 when nothing is cached.
pub fn hit_rate<I>(access_counts: I) -> f64
where
    I: IntoIterator<Item = u64>,
{
    let (accesses, hits) = access_counts
        .into_iter()
        .fold((0u64, 0u64), |(accesses, hits), count| {
            (accesses + count, hits + count.saturating_sub(1))
        });

    if accesses == 0 {
        0.0
    } else {
        hits as f64 / accesses as f64
    }
}
