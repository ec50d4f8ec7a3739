//! Scripted transformer for cache and lifecycle tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheLimits, ImageCache};
use crate::error::{ImageError, Result};
use crate::memory::MemoryAccountant;
use crate::transform::{
    CompressedImage, CompressionConfig, ImageFormat, ImageInfo, Transformer, TransportImage,
};

#[derive(Debug, Clone)]
pub(crate) enum CompressOutcome {
    /// Produces a new reference of this size
    Size(u64),
    /// Returns the source unchanged
    Unchanged,
    Fail(ImageError),
}

#[derive(Debug, Clone)]
struct StubImage {
    size: u64,
    compress: CompressOutcome,
}

/// Transformer whose sizes and compression results are set up front.
#[derive(Default)]
pub(crate) struct StubTransformer {
    images: Mutex<HashMap<String, StubImage>>,
    delay: Option<Duration>,
    compress_delay: Option<Duration>,
    pub estimates: AtomicUsize,
    pub compressions: AtomicUsize,
    pub releases: AtomicUsize,
    pub discarded: Mutex<Vec<String>>,
}

impl StubTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source of `size` bytes that compresses to itself.
    pub fn with_image(self, uri: &str, size: u64) -> Self {
        self.images.lock().unwrap().insert(
            uri.to_string(),
            StubImage {
                size,
                compress: CompressOutcome::Unchanged,
            },
        );
        self
    }

    /// Sets what compressing `uri` produces.
    pub fn with_compression(self, uri: &str, outcome: CompressOutcome) -> Self {
        if let Some(image) = self.images.lock().unwrap().get_mut(uri) {
            image.compress = outcome;
        }
        self
    }

    /// Delays every estimate, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delays every compression, so a load can be abandoned mid-flight.
    pub fn with_compress_delay(mut self, delay: Duration) -> Self {
        self.compress_delay = Some(delay);
        self
    }

    pub fn compressed_uri(uri: &str) -> String {
        format!("{}.compressed.jpg", uri)
    }

    fn lookup(&self, uri: &str) -> Result<StubImage> {
        self.images
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| ImageError::SourceUnreachable(uri.to_string()))
    }
}

#[async_trait]
impl Transformer for StubTransformer {
    async fn estimate_size(&self, uri: &str) -> Result<ImageInfo> {
        self.estimates.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let image = self.lookup(uri)?;
        Ok(ImageInfo {
            width: 1000,
            height: 1000,
            byte_size: image.size,
            format: ImageFormat::Jpeg,
        })
    }

    async fn compress(&self, uri: &str, _config: &CompressionConfig) -> Result<CompressedImage> {
        self.compressions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.compress_delay {
            tokio::time::sleep(delay).await;
        }
        let image = self.lookup(uri)?;
        let (uri, byte_size) = match image.compress {
            CompressOutcome::Size(size) => (Self::compressed_uri(uri), size),
            CompressOutcome::Unchanged => (uri.to_string(), image.size),
            CompressOutcome::Fail(e) => return Err(e),
        };
        Ok(CompressedImage {
            uri,
            byte_size,
            width: 800,
            height: 800,
            format: ImageFormat::Jpeg,
        })
    }

    async fn to_transport_encoding(&self, uri: &str, format: ImageFormat) -> Result<TransportImage> {
        let image = self.lookup(uri)?;
        TransportImage::from_bytes(&vec![0u8; image.size as usize], format)
    }

    fn release_temp_resources(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn discard(&self, uri: &str) {
        self.discarded.lock().unwrap().push(uri.to_string());
    }
}

/// Builds a cache over `stub` with its own accountant.
pub(crate) fn cache_with(
    stub: StubTransformer,
    memory_limit: u64,
    limits: CacheLimits,
) -> (ImageCache, Arc<MemoryAccountant>, Arc<StubTransformer>) {
    let accountant = Arc::new(MemoryAccountant::new(memory_limit, 0.8));
    let stub = Arc::new(stub);
    let cache = ImageCache::new(limits, accountant.clone(), stub.clone());
    (cache, accountant, stub)
}

/// Limits used by most tests: the end-to-end scenario's values.
pub(crate) fn scenario_limits() -> CacheLimits {
    CacheLimits {
        max_size: 50_000_000,
        max_entries: 20,
        expiry: Duration::from_secs(1800),
    }
}
