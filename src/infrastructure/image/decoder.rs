//! `image` crate adapter for the decoding port.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, Limits, RgbImage};
use jpeg_decoder::PixelFormat;
use tracing::trace;

use crate::application::services::downsampler::sampled_dimensions;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::BitmapDecoder;

/// Largest allocation a single decode may make, in bytes.
pub const DEFAULT_MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// Decodes PNG, JPEG and WebP.
///
/// JPEG is decoded directly at 1/2, 1/4 or 1/8 scale by the DCT, so large
/// photos never materialise at full resolution. PNG and WebP have no scaled
/// decode and go through the `image` crate at full size before being
/// subsampled. Every decode is capped at `max_alloc` bytes.
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateDecoder {
    max_alloc: u64,
}

impl Default for ImageCrateDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECODE_ALLOC)
    }
}

impl ImageCrateDecoder {
    /// Creates a decoder whose allocations are capped at `max_alloc` bytes.
    #[must_use]
    pub const fn new(max_alloc: u64) -> Self {
        Self { max_alloc }
    }

    fn reader<'a>(&self, bytes: &'a [u8]) -> CacheResult<ImageReader<Cursor<&'a [u8]>>> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CacheError::decode(format!("Failed to detect image format: {e}")))?;
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_alloc);
        reader.limits(limits);
        Ok(reader)
    }

    /// Scaled JPEG decode. Returns `None` for pixel formats the `image`
    /// path handles better.
    fn decode_jpeg_scaled(
        &self,
        bytes: &[u8],
        target: (u32, u32),
    ) -> CacheResult<Option<DynamicImage>> {
        let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
        let max_buffer = usize::try_from(self.max_alloc).unwrap_or(usize::MAX);
        decoder.set_max_decoding_buffer_size(max_buffer);

        let requested = (
            u16::try_from(target.0).unwrap_or(u16::MAX),
            u16::try_from(target.1).unwrap_or(u16::MAX),
        );
        let (width, height) = decoder
            .scale(requested.0, requested.1)
            .map_err(|e| CacheError::decode(format!("Failed to read JPEG header: {e}")))?;
        let format = decoder
            .info()
            .map(|info| info.pixel_format)
            .ok_or_else(|| CacheError::decode("JPEG header missing"))?;
        if !matches!(format, PixelFormat::L8 | PixelFormat::RGB24) {
            return Ok(None);
        }

        let pixels = decoder
            .decode()
            .map_err(|e| CacheError::decode(format!("Failed to decode JPEG: {e}")))?;
        let (width, height) = (u32::from(width), u32::from(height));
        trace!(width, height, "Decoded JPEG at reduced scale");

        let image = match format {
            PixelFormat::L8 => {
                GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
            }
            _ => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        };
        image
            .map(Some)
            .ok_or_else(|| CacheError::decode("JPEG pixel buffer has the wrong length"))
    }
}

/// Nearest-neighbour reduction to `target`, a no-op if already that size.
fn subsample(image: DynamicImage, target: (u32, u32)) -> DynamicImage {
    if (image.width(), image.height()) == target {
        return image;
    }
    image.resize_exact(target.0, target.1, FilterType::Nearest)
}

impl BitmapDecoder for ImageCrateDecoder {
    fn decode_bounds(&self, bytes: &[u8]) -> CacheResult<(u32, u32)> {
        self.reader(bytes)?
            .into_dimensions()
            .map_err(|e| CacheError::decode(format!("Failed to read image bounds: {e}")))
    }

    fn decode_sampled(&self, bytes: &[u8], sample_factor: u32) -> CacheResult<DynamicImage> {
        let reader = self.reader(bytes)?;

        if sample_factor > 1 && reader.format() == Some(ImageFormat::Jpeg) {
            let (width, height) = self.decode_bounds(bytes)?;
            let target = sampled_dimensions(width, height, sample_factor);
            if let Some(image) = self.decode_jpeg_scaled(bytes, target)? {
                return Ok(subsample(image, target));
            }
        }

        let image = reader
            .decode()
            .map_err(|e| CacheError::decode(format!("Failed to decode image: {e}")))?;
        if sample_factor <= 1 {
            return Ok(image);
        }
        let target = sampled_dimensions(image.width(), image.height(), sample_factor);
        Ok(subsample(image, target))
    }
}
