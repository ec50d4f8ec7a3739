//! Memory Accountant Module
//!
//! Process-wide counter of estimated image bytes checked against a fixed
//! budget. Accounting is advisory: nothing here touches real allocations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{debug, warn};

// == Pressure Relief ==
/// Hook invoked when usage overshoots the budget, before half of the
/// tracked usage is dropped.
pub trait PressureRelief: Send + Sync {
    /// Releases whatever temporary resources can be freed right away.
    fn relieve(&self);
}

// == Memory Usage ==
/// Snapshot of accounted memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryUsage {
    /// Bytes currently accounted
    pub current: u64,
    /// Budget in bytes
    pub limit: u64,
    /// `current / limit` as a percentage
    pub percentage: f64,
}

// == Memory Accountant ==
/// Tracks estimated bytes in use against a budget.
pub struct MemoryAccountant {
    current: AtomicU64,
    limit: u64,
    warning_threshold: f64,
    relief: OnceLock<Arc<dyn PressureRelief>>,
}

impl MemoryAccountant {
    // == Constructor ==
    /// Creates an accountant with the given budget and warning fraction.
    ///
    /// # Arguments
    /// * `limit` - Budget in bytes
    /// * `warning_threshold` - Fraction of the budget (e.g. `0.8`) above
    ///   which a warning is logged
    pub fn new(limit: u64, warning_threshold: f64) -> Self {
        Self {
            current: AtomicU64::new(0),
            limit,
            warning_threshold,
            relief: OnceLock::new(),
        }
    }

    /// Registers the emergency hook. Only the first registration sticks.
    pub fn set_pressure_relief(&self, relief: Arc<dyn PressureRelief>) -> bool {
        self.relief.set(relief).is_ok()
    }

    // == Track Usage ==
    /// Adds `bytes` to current usage.
    ///
    /// Crossing the warning threshold only logs. Going over the limit runs
    /// the emergency reduction: the pressure hook fires, then roughly half
    /// of current usage is released. Callers are expected to check
    /// [`can_allocate`](Self::can_allocate) first.
    pub fn track_usage(&self, bytes: u64) {
        let current = self
            .current
            .fetch_add(bytes, Ordering::SeqCst)
            .saturating_add(bytes);

        if current as f64 > self.limit as f64 * self.warning_threshold {
            warn!(
                "Memory usage high: {} / {} bytes ({:.1}%)",
                current,
                self.limit,
                percentage(current, self.limit)
            );
        }

        if current > self.limit {
            warn!(
                "Memory limit exceeded ({} > {}), running emergency reduction",
                current, self.limit
            );
            if let Some(relief) = self.relief.get() {
                relief.relieve();
            }
            self.release_memory(self.current() / 2);
        }
    }

    // == Release Memory ==
    /// Subtracts `bytes` from current usage, never going below zero.
    pub fn release_memory(&self, bytes: u64) {
        let _ = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
        debug!("Released {} bytes, now {}", bytes, self.current());
    }

    // == Queries ==
    /// Returns the current usage snapshot.
    pub fn usage(&self) -> MemoryUsage {
        let current = self.current();
        MemoryUsage {
            current,
            limit: self.limit,
            percentage: percentage(current, self.limit),
        }
    }

    /// Bytes currently accounted.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Budget in bytes.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Fraction of the limit above which usage is logged as high.
    pub fn warning_threshold(&self) -> f64 {
        self.warning_threshold
    }

    /// Whether `bytes` more would still fit in the budget.
    pub fn can_allocate(&self, bytes: u64) -> bool {
        self.current().saturating_add(bytes) <= self.limit
    }

    // == Reset ==
    /// Drops all accounted usage. Used after full cache clears.
    pub fn reset(&self) {
        self.current.store(0, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MemoryAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAccountant")
            .field("current", &self.current())
            .field("limit", &self.limit)
            .field("warning_threshold", &self.warning_threshold)
            .finish()
    }
}

fn percentage(current: u64, limit: u64) -> f64 {
    if limit == 0 {
        if current == 0 {
            0.0
        } else {
            100.0
        }
    } else {
        current as f64 / limit as f64 * 100.0
    }
}
