//! Concrete display target backed by a mutex-guarded slot.

use parking_lot::Mutex;

use crate::domain::entities::{Bitmap, ImageStatus};
use crate::domain::ports::DisplayTarget;

#[derive(Debug, Default)]
struct SlotState {
    width: u32,
    height: u32,
    tag: Option<String>,
    image: Option<Bitmap>,
    status: ImageStatus,
}

/// A reusable cell that shows one image, like a recycled list or grid item.
#[derive(Debug, Default)]
pub struct ImageSlot {
    state: Mutex<SlotState>,
}

impl ImageSlot {
    /// Creates an empty slot laid out at `width` x `height`.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Mutex::new(SlotState {
                width,
                height,
                ..SlotState::default()
            }),
        }
    }

    /// Updates the layout size used to bound future loads.
    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.width = width;
        state.height = height;
    }

    /// The image currently shown, if any.
    #[must_use]
    pub fn image(&self) -> Option<Bitmap> {
        self.state.lock().image.clone()
    }

    /// Whether the slot is waiting for or showing its assigned image.
    #[must_use]
    pub fn status(&self) -> ImageStatus {
        self.state.lock().status
    }

    /// Detaches the slot from its URL and drops the shown image.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.tag = None;
        state.image = None;
        state.status = ImageStatus::NotStarted;
    }
}

impl DisplayTarget for ImageSlot {
    fn width(&self) -> u32 {
        self.state.lock().width
    }

    fn height(&self) -> u32 {
        self.state.lock().height
    }

    fn tag(&self) -> Option<String> {
        self.state.lock().tag.clone()
    }

    fn set_tag(&self, url: &str) {
        let mut state = self.state.lock();
        if state.tag.as_deref() != Some(url) {
            // The previous image belongs to another item.
            state.image = None;
        }
        state.tag = Some(url.to_string());
        state.status = ImageStatus::Loading;
    }

    fn set_image(&self, bitmap: Bitmap) {
        let mut state = self.state.lock();
        state.image = Some(bitmap);
        state.status = ImageStatus::Ready;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_lifecycle() {
        let slot = ImageSlot::new(64, 48);
        assert_eq!(slot.status(), ImageStatus::NotStarted);
        assert_eq!((slot.width(), slot.height()), (64, 48));

        slot.set_tag("https://example.com/a.png");
        assert!(slot.status().is_loading());

        slot.set_image(Arc::new(image::DynamicImage::new_rgb8(4, 4)));
        assert!(slot.status().is_ready());
        assert_eq!(slot.image().map(|img| img.width()), Some(4));
    }

    #[test]
    fn test_retag_drops_previous_image() {
        let slot = ImageSlot::new(10, 10);
        slot.set_tag("first");
        slot.set_image(Arc::new(image::DynamicImage::new_rgb8(2, 2)));

        slot.set_tag("first");
        assert!(slot.image().is_some());

        slot.set_tag("second");
        assert!(slot.image().is_none());
        assert_eq!(slot.tag().as_deref(), Some("second"));
    }

    #[test]
    fn test_resize_and_clear() {
        let slot = ImageSlot::new(10, 10);
        slot.resize(200, 100);
        assert_eq!((slot.width(), slot.height()), (200, 100));

        slot.set_tag("url");
        slot.clear();
        assert!(slot.tag().is_none());
        assert_eq!(slot.status(), ImageStatus::NotStarted);
    }
}
