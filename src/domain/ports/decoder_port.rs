//! Port definition for bitmap decoding.

use crate::domain::errors::CacheResult;

/// Blocking decoding primitives. Callers run these off the async executor.
pub trait BitmapDecoder: Send + Sync {
    /// Reads only the header and returns `(width, height)`.
    fn decode_bounds(&self, bytes: &[u8]) -> CacheResult<(u32, u32)>;

    /// Decodes the pixels, dividing each dimension by `sample_factor`.
    fn decode_sampled(&self, bytes: &[u8], sample_factor: u32)
    -> CacheResult<image::DynamicImage>;
}
