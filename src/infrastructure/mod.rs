//! Infrastructure layer with adapters for the filesystem, network and codecs.

/// Application configuration.
pub mod config;
/// Image caching, fetching and loading.
pub mod image;

pub use config::{AppConfig, CliArgs, Command, ConfigStore, ImageLoaderConfig, LogLevel};
pub use image::{CacheStats, DiskImageCache, ImageLoader, MemoryImageCache};
