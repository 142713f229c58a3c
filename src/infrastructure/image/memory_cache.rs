//! In-memory LRU image cache bounded by pixel memory.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{Bitmap, CacheKey, bitmap_cost_bytes};

/// Nominal heap the default budget is derived from (512 MiB).
pub const NOMINAL_HEAP_KIB: usize = 512 * 1024;

/// Default budget: one eighth of the nominal heap, in KiB.
pub const DEFAULT_CAPACITY_KIB: usize = NOMINAL_HEAP_KIB / 8;

/// In-memory LRU cache for decoded images.
/// Entries are costed by row stride times height; capacity is in KiB.
pub struct MemoryImageCache {
    state: Mutex<CacheState>,
    capacity_kib: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheState {
    entries: LruCache<CacheKey, Bitmap>,
    used_kib: usize,
}

/// Cost of a bitmap in KiB, rounded up so tiny images are never free.
fn cost_kib(bitmap: &Bitmap) -> usize {
    bitmap_cost_bytes(bitmap).div_ceil(1024)
}

impl MemoryImageCache {
    /// Creates a new cache holding at most `capacity_kib` KiB of pixels.
    #[must_use]
    pub fn new(capacity_kib: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                used_kib: 0,
            }),
            capacity_kib,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY_KIB)
    }

    /// Returns the image for `key`, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Bitmap> {
        let mut state = self.state.lock();
        if let Some(img) = state.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(img.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<Bitmap> {
        self.state.lock().entries.peek(key).cloned()
    }

    /// Stores `image` unless an entry for `key` already exists.
    ///
    /// Returns true if the image was inserted. Images larger than the whole
    /// budget are not cached.
    pub fn put_if_absent(&self, key: CacheKey, image: Bitmap) -> bool {
        let cost = cost_kib(&image);
        let mut state = self.state.lock();

        if state.entries.contains(&key) {
            trace!(key = %key, "Memory cache already holds key, keeping first entry");
            return false;
        }
        if cost > self.capacity_kib {
            debug!(
                key = %key,
                cost_kib = cost,
                capacity_kib = self.capacity_kib,
                "Image exceeds memory budget, not caching"
            );
            return false;
        }

        debug!(key = %key, cost_kib = cost, "Storing image in memory cache");
        state.entries.put(key, image);
        state.used_kib += cost;

        while state.used_kib > self.capacity_kib {
            let Some((evicted, img)) = state.entries.pop_lru() else {
                break;
            };
            state.used_kib -= cost_kib(&img);
            debug!(key = %evicted, "Evicted image from memory cache");
        }
        true
    }

    /// Removes an image from the cache.
    pub fn evict(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if let Some(img) = state.entries.pop(key) {
            state.used_kib -= cost_kib(&img);
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    /// Clears all images from the cache.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.used_kib = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns the current number of cached images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured budget in KiB.
    #[must_use]
    pub const fn capacity_kib(&self) -> usize {
        self.capacity_kib
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let state = self.state.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: state.entries.len(),
            used_kib: state.used_kib,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Pixel memory held, in KiB.
    pub used_kib: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} KiB), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.used_kib, self.hit_rate, self.hits, self.misses
        )
    }
}
