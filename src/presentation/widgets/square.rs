//! Square layout constraint for any display target.

use crate::domain::entities::Bitmap;
use crate::domain::ports::DisplayTarget;

/// Wraps a target so it measures as tall as it is wide.
///
/// Loads bound by a `Square` target request a square region, which suits
/// thumbnail grids.
#[derive(Debug, Default)]
pub struct Square<T> {
    inner: T,
}

impl<T: DisplayTarget> Square<T> {
    /// Applies the constraint to `inner`.
    pub const fn new(inner: T) -> Self {
        Self { inner }
    }

    /// The wrapped target.
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    /// Removes the constraint.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: DisplayTarget> DisplayTarget for Square<T> {
    fn width(&self) -> u32 {
        self.inner.width()
    }

    fn height(&self) -> u32 {
        self.inner.width()
    }

    fn tag(&self) -> Option<String> {
        self.inner.tag()
    }

    fn set_tag(&self, url: &str) {
        self.inner.set_tag(url);
    }

    fn set_image(&self, bitmap: Bitmap) {
        self.inner.set_image(bitmap);
    }
}
