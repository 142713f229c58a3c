//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with cost-bounded LRU eviction
//! - Journaled disk caching of original bytes
//! - HTTP fetching and `image` crate decoding
//! - A bounded worker pool and the loader that ties the tiers together

pub mod decoder;
pub mod disk_cache;
pub mod fetcher;
mod journal;
pub mod loader;
pub mod memory_cache;
pub mod worker_pool;

pub use decoder::ImageCrateDecoder;
pub use disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache, DiskWriter};
pub use fetcher::HttpFetcher;
pub use loader::ImageLoader;
pub use memory_cache::{CacheStats, DEFAULT_CAPACITY_KIB, MemoryImageCache};
pub use worker_pool::{PoolStats, WorkerPool, default_size as default_pool_size};
