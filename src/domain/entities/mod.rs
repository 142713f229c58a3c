//! Domain entity definitions.

mod cache_key;
mod image;

pub use cache_key::CacheKey;
pub use image::{Bitmap, ImageSource, ImageStatus, LoadResult, LoadedImage, bitmap_cost_bytes};
