//! Cache Entry Module
//!
//! One cached image: original and compressed references, sizes, and the
//! timestamps that drive expiry and LRU eviction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Entry ==
/// Cached record for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    /// The original, uncompressed reference
    pub source_uri: String,
    /// Compressed variant, present only when compression was adopted
    pub compressed_uri: Option<String>,
    /// Size of the original in bytes
    pub original_size: u64,
    /// Actual size of the compressed variant
    pub compressed_size: Option<u64>,
    /// Insertion time, drives expiry
    pub created_at: DateTime<Utc>,
    /// Accesses including the insertion
    pub access_count: u64,
    /// Last insertion or hit, drives LRU eviction
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry for an uncompressed original.
    pub fn new(source_uri: impl Into<String>, original_size: u64) -> Self {
        let now = Utc::now();
        Self {
            source_uri: source_uri.into(),
            compressed_uri: None,
            original_size,
            compressed_size: None,
            created_at: now,
            access_count: 1,
            last_accessed_at: now,
        }
    }

    /// Attaches an adopted compression result.
    pub fn with_compressed(mut self, uri: impl Into<String>, size: u64) -> Self {
        self.compressed_uri = Some(uri.into());
        self.compressed_size = Some(size);
        self
    }

    // == Effective Values ==
    /// Reference handed to callers: compressed if present.
    pub fn effective_uri(&self) -> &str {
        self.compressed_uri.as_deref().unwrap_or(&self.source_uri)
    }

    /// Bytes this entry accounts for.
    pub fn effective_size(&self) -> u64 {
        self.compressed_size.unwrap_or(self.original_size)
    }

    // == Is Expired ==
    /// Whether the entry's age has reached `expiry`.
    ///
    /// An entry created "in the future" (clock moved backwards) is not expired.
    pub fn is_expired(&self, expiry: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.created_at)
            .to_std()
            .map(|age| age >= expiry)
            .unwrap_or(false)
    }

    // == Touch ==
    /// Records a cache hit.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Utc::now();
    }
}
