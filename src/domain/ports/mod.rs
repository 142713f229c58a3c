mod decoder_port;
mod display_target_port;
mod fetcher_port;

pub use decoder_port::BitmapDecoder;
pub use display_target_port::DisplayTarget;
pub use fetcher_port::{ByteStream, ImageFetcher};

#[cfg(test)]
pub mod mocks {
    pub use super::display_target_port::mock::RecordingTarget;
    pub use super::fetcher_port::mock::{MockFetcher, MockResponse};
}
