//! Power-of-two downsampling that bounds decoded bitmap memory.

use tracing::trace;

use crate::domain::errors::CacheResult;
use crate::domain::ports::BitmapDecoder;

/// Computes the largest power-of-two sample factor that keeps the decoded
/// image at least as large as the requested bound.
///
/// A requested dimension of zero means "don't bound" and yields 1.
#[must_use]
pub fn compute_sample_factor(
    orig_width: u32,
    orig_height: u32,
    req_width: u32,
    req_height: u32,
) -> u32 {
    if req_width == 0 || req_height == 0 {
        return 1;
    }

    let half_width = orig_width / 2;
    let half_height = orig_height / 2;
    let mut factor = 1;

    while half_height / factor > req_height || half_width / factor > req_width {
        factor *= 2;
    }

    factor
}

/// Dimensions of an image decoded with `factor`, never below one pixel.
#[must_use]
pub fn sampled_dimensions(width: u32, height: u32, factor: u32) -> (u32, u32) {
    let factor = factor.max(1);
    ((width / factor).max(1), (height / factor).max(1))
}

/// Decodes `bytes` in two passes: bounds first, then pixels at the computed factor.
///
/// # Errors
/// Returns `CacheError::Decode` if either pass fails.
pub fn decode_bounded(
    decoder: &dyn BitmapDecoder,
    bytes: &[u8],
    req_width: u32,
    req_height: u32,
) -> CacheResult<image::DynamicImage> {
    let (width, height) = decoder.decode_bounds(bytes)?;
    let factor = compute_sample_factor(width, height, req_width, req_height);
    trace!(
        width,
        height,
        req_width,
        req_height,
        factor,
        "Decoding with sample factor"
    );
    decoder.decode_sampled(bytes, factor)
}
