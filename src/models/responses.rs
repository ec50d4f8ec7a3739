//! Response DTOs for the image service API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::lifecycle::AppVisibility;
use crate::service::HealthSnapshot;

/// Response body for GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" when memory is under pressure
    pub status: String,
    #[serde(flatten)]
    pub snapshot: HealthSnapshot,
}

impl HealthResponse {
    /// Classifies a snapshot against the memory warning percentage.
    pub fn from_snapshot(snapshot: HealthSnapshot, warning_percent: f64) -> Self {
        let status = if snapshot.memory.percentage > warning_percent {
            "degraded"
        } else {
            "healthy"
        };
        Self {
            status: status.to_string(),
            snapshot,
        }
    }
}

/// Response body for POST /images/preload
#[derive(Debug, Clone, Serialize)]
pub struct PreloadResponse {
    pub message: String,
    /// Number of URIs queued
    pub accepted: usize,
}

impl PreloadResponse {
    pub fn new(accepted: usize) -> Self {
        Self {
            message: format!("Preloading {} images", accepted),
            accepted,
        }
    }
}

/// Response body for DELETE /images
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub key: String,
    /// Whether an entry existed
    pub removed: bool,
}

impl ClearResponse {
    pub fn new(key: impl Into<String>, removed: bool) -> Self {
        Self {
            key: key.into(),
            removed,
        }
    }
}

/// Response body for DELETE /cache and POST /cleanup
#[derive(Debug, Clone, Serialize)]
pub struct ClearedResponse {
    pub message: String,
    pub cleared: usize,
}

impl ClearedResponse {
    pub fn new(cleared: usize) -> Self {
        Self {
            message: format!("Cleared {} cached images", cleared),
            cleared,
        }
    }
}

/// Response body for POST /lifecycle
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleResponse {
    pub state: AppVisibility,
    pub pending_cleanup: bool,
}
