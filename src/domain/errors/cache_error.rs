//! Image loading error types.

use thiserror::Error;

/// Result type for cache and load operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while loading or caching an image.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    /// Network unreachable, malformed URL or non-2xx status.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The bytes could not be decoded into a bitmap.
    #[error("decode failure: {message}")]
    Decode { message: String },

    /// Disk write, rename or journal error.
    #[error("storage failure: {message}")]
    Storage { message: String },

    /// A blocking load was issued from the delivery thread.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The load finished without producing a bitmap.
    #[error("image not available: {url}")]
    NotFound { url: String },
}

impl CacheError {
    /// Creates transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates not found error.
    #[must_use]
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Returns whether the error is a programming mistake rather than a runtime condition.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns whether retrying the same load may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::NotFound { .. })
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}
