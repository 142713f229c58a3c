//! Domain types for decoded images and load requests.

use std::sync::Arc;

use super::CacheKey;
use crate::domain::ports::DisplayTarget;

/// A decoded, shareable bitmap.
pub type Bitmap = Arc<image::DynamicImage>;

/// Memory footprint of a bitmap: row stride times height, in bytes.
#[must_use]
pub fn bitmap_cost_bytes(bitmap: &image::DynamicImage) -> usize {
    let stride = bitmap.width() as usize * usize::from(bitmap.color().bytes_per_pixel());
    stride * bitmap.height() as usize
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from in-memory LRU cache.
    MemoryCache,
    /// Loaded from disk cache.
    DiskCache,
    /// Downloaded from network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A decoded image together with its key and provenance.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key of the source URL.
    pub key: CacheKey,
    /// The decoded bitmap.
    pub image: Bitmap,
    /// Tier that satisfied the load.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Creates a new loaded image record.
    #[must_use]
    pub const fn new(key: CacheKey, image: Bitmap, source: ImageSource) -> Self {
        Self { key, image, source }
    }
}

/// Lifecycle of a display target's image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageStatus {
    /// No image has been requested.
    #[default]
    NotStarted,
    /// A request is assigned but no bitmap has arrived yet.
    Loading,
    /// The bitmap for the current request is shown.
    Ready,
}

impl ImageStatus {
    /// Returns true if the image is ready for rendering.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true if the image is currently being loaded.
    #[must_use]
    pub const fn is_loading(self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// A finished asynchronous load, waiting to be applied to its target.
pub struct LoadResult {
    /// URL the load was issued for.
    pub url: String,
    /// Decoded bitmap.
    pub bitmap: Bitmap,
    /// Target that requested the load.
    pub target: Arc<dyn DisplayTarget>,
}

impl std::fmt::Debug for LoadResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadResult")
            .field("url", &self.url)
            .field("width", &self.bitmap.width())
            .field("height", &self.bitmap.height())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_uses_row_stride() {
        let rgba = image::DynamicImage::new_rgba8(32, 16);
        assert_eq!(bitmap_cost_bytes(&rgba), 32 * 4 * 16);

        let rgb = image::DynamicImage::new_rgb8(10, 10);
        assert_eq!(bitmap_cost_bytes(&rgb), 10 * 3 * 10);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ImageSource::DiskCache.to_string(), "disk");
        assert_eq!(ImageSource::Network.to_string(), "network");
    }
}
