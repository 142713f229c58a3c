//! HTTP adapter for the fetcher port.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ByteStream, ImageFetcher};

/// Streams image bodies over HTTP(S) GET.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the given request timeout and user agent.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration, user_agent: &str) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| CacheError::transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<ByteStream> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| CacheError::transport(format!("Malformed URL {url}: {e}")))?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| CacheError::transport(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CacheError::transport(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        debug!(url = %url, length = ?response.content_length(), "Streaming image body");

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| CacheError::transport(format!("Failed to read body: {e}")))
        });
        Ok(stream.boxed())
    }
}
