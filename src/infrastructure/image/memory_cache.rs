//! In-memory LRU cache of decoded images.
//!
//! Entries are shared `Arc`s: the cache never keeps an image alive on its own
//! once it is evicted, and eviction is the only way entries disappear. Limits
//! are an entry count and a pixel byte budget, oldest use evicted first.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{DecodedImage, TargetSize};

/// Default maximum number of images to cache in memory.
pub const DEFAULT_CACHE_SIZE: usize = 50;

struct CacheInner {
    entries: LruCache<String, Arc<DecodedImage>>,
    bytes: usize,
    max_bytes: usize,
}

impl CacheInner {
    fn forget(&mut self, image: &DecodedImage) {
        self.bytes = self.bytes.saturating_sub(image.byte_size());
    }
}

/// In-memory LRU cache for decoded images keyed by request identity.
/// Thread-safe; lookups happen on the submitting thread.
pub struct MemoryImageCache {
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the specified capacity and byte budget.
    /// A zero byte budget disables the byte limit.
    #[must_use]
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(cap),
                bytes: 0,
                max_bytes,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default capacity and no byte budget.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_SIZE, 0)
    }

    /// Looks up an image that can serve a request for `target`.
    ///
    /// A downsampled entry only serves explicit targets no larger than itself,
    /// anything else counts as a miss.
    pub fn lookup(&self, key: &str, target: TargetSize) -> Option<Arc<DecodedImage>> {
        let found = {
            let mut inner = self.inner.lock();
            inner.entries.get(key).cloned()
        };

        match found {
            Some(img) if img.serves(target) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Memory cache hit");
                Some(img)
            }
            Some(img) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(
                    key = %key,
                    cached = %TargetSize::new(img.width(), img.height()),
                    requested = %target,
                    "Memory cache entry too small"
                );
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Memory cache miss");
                None
            }
        }
    }

    /// Stores an image, replacing any previous entry for the key.
    pub fn store(&self, key: String, image: Arc<DecodedImage>) {
        let mut inner = self.inner.lock();
        let size = image.byte_size();
        debug!(key = %key, size = size, "Storing image in memory cache");

        inner.bytes += size;
        if let Some((_, old)) = inner.entries.push(key, image) {
            inner.forget(&old);
        }

        while inner.max_bytes > 0 && inner.bytes > inner.max_bytes && inner.entries.len() > 1 {
            let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.forget(&evicted);
            debug!(key = %evicted_key, "Evicted image from memory cache");
        }
    }

    /// Peeks at an image without promoting it in the LRU or counting stats.
    pub fn peek(&self, key: &str) -> Option<Arc<DecodedImage>> {
        self.inner.lock().entries.peek(key).cloned()
    }

    /// Removes an image from the cache.
    pub fn evict(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.pop(key) {
            inner.forget(&old);
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    /// Clears all images from the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns the current number of cached images.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns pixel bytes currently held.
    pub fn byte_size(&self) -> usize {
        self.inner.lock().bytes
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
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
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
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}
