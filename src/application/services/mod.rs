pub mod downsampler;

pub use downsampler::{compute_sample_factor, decode_bounded, sampled_dimensions};
