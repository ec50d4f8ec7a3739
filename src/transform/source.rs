//! Image sources: where the transformer reads bytes from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{ImageError, Result};

/// Upper bound on the bytes read when only the header is needed.
pub const HEADER_READ_LIMIT: u64 = 64 * 1024;

/// Total size and leading bytes of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHead {
    pub byte_size: u64,
    /// At most `HEADER_READ_LIMIT` bytes from the start
    pub header: Vec<u8>,
}

/// Fetches raw image bytes for a URI.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Reads the full contents behind `uri`.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>>;

    /// Reads the size and header of `uri`.
    ///
    /// The default reads everything; sources that can stat should override.
    async fn head(&self, uri: &str) -> Result<SourceHead> {
        let mut bytes = self.fetch(uri).await?;
        let byte_size = bytes.len() as u64;
        bytes.truncate(HEADER_READ_LIMIT as usize);
        Ok(SourceHead {
            byte_size,
            header: bytes,
        })
    }
}

/// Reads local files addressed by plain paths or `file://` URIs.
#[derive(Debug, Clone, Default)]
pub struct FileImageSource;

impl FileImageSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageSource for FileImageSource {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let path = uri_to_path(uri).ok_or_else(|| {
            ImageError::SourceUnreachable(format!("{}: unsupported scheme", uri))
        })?;

        debug!("Reading image from {}", path.display());
        tokio::fs::read(&path)
            .await
            .map_err(|e| ImageError::SourceUnreachable(format!("{}: {}", uri, e)))
    }

    async fn head(&self, uri: &str) -> Result<SourceHead> {
        let path = uri_to_path(uri).ok_or_else(|| {
            ImageError::SourceUnreachable(format!("{}: unsupported scheme", uri))
        })?;
        let to_error =
            |e: std::io::Error| ImageError::SourceUnreachable(format!("{}: {}", uri, e));

        let file = tokio::fs::File::open(&path).await.map_err(to_error)?;
        let byte_size = file.metadata().await.map_err(to_error)?.len();

        let mut header = Vec::with_capacity(byte_size.min(HEADER_READ_LIMIT) as usize);
        file.take(HEADER_READ_LIMIT)
            .read_to_end(&mut header)
            .await
            .map_err(to_error)?;

        debug!("Read {} header bytes of {}", header.len(), path.display());
        Ok(SourceHead { byte_size, header })
    }
}

/// Resolves a local URI to a filesystem path.
///
/// Accepts `file://` URIs and bare paths; anything with another scheme
/// yields `None`.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if uri.contains("://") {
        return None;
    }
    Some(PathBuf::from(uri))
}

/// Builds a `file://` URI for a path.
pub fn path_to_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}
