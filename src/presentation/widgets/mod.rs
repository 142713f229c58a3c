mod image_slot;
mod square;

pub use image_slot::ImageSlot;
pub use square::Square;
