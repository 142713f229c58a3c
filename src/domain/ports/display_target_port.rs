//! Port definition for the widgets images are delivered to.

use crate::domain::entities::Bitmap;

/// A mutable on-screen element that shows one image at a time.
///
/// The tag records which URL the target currently wants. Targets are reused
/// for different items, so a finished load is only applied while the tag
/// still names its URL. Implementations provide their own interior mutability.
pub trait DisplayTarget: Send + Sync {
    /// Current layout width in pixels; zero means unbounded.
    fn width(&self) -> u32;

    /// Current layout height in pixels; zero means unbounded.
    fn height(&self) -> u32;

    /// URL the target is currently assigned to.
    fn tag(&self) -> Option<String>;

    /// Assigns the target to `url`.
    fn set_tag(&self, url: &str);

    /// Shows `bitmap`.
    fn set_image(&self, bitmap: Bitmap);
}

#[cfg(test)]
pub mod mock {
    use parking_lot::Mutex;

    use super::DisplayTarget;
    use crate::domain::entities::Bitmap;

    /// Target that records the width of every bitmap it is given.
    pub struct RecordingTarget {
        width: u32,
        height: u32,
        tag: Mutex<Option<String>>,
        images: Mutex<Vec<u32>>,
    }

    impl RecordingTarget {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                tag: Mutex::new(None),
                images: Mutex::new(Vec::new()),
            }
        }

        pub fn images(&self) -> Vec<u32> {
            self.images.lock().clone()
        }
    }

    impl DisplayTarget for RecordingTarget {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn tag(&self) -> Option<String> {
            self.tag.lock().clone()
        }

        fn set_tag(&self, url: &str) {
            *self.tag.lock() = Some(url.to_string());
        }

        fn set_image(&self, bitmap: Bitmap) {
            self.images.lock().push(bitmap.width());
        }
    }
}
