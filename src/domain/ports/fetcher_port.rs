//! Port definition for fetching raw image bytes.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::domain::errors::CacheResult;

/// Stream of body chunks. A chunk error ends the download.
pub type ByteStream = BoxStream<'static, CacheResult<Bytes>>;

/// Port for opening a byte stream to an image URL.
/// Implementations must release their connection whenever the stream is dropped.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Opens a GET request for `url`.
    ///
    /// Fails with `CacheError::Transport` on malformed URLs, connection
    /// errors and non-success statuses. No retries are attempted.
    async fn fetch(&self, url: &str) -> CacheResult<ByteStream>;
}
