//! Bounded LRU cache of decoded tiles.
//!
//! [`TileCache`] is shared between the thread that decodes tiles and the thread
//! that draws them, so every operation goes through one mutex.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use serde::Serialize;

use crate::decoder::TileImage;

/// A decoded tile and its grid position.
#[derive(Debug, Clone)]
pub struct Tile {
    pub col: u32,
    pub row: u32,
    /// Zoom token (rung of the zoom ladder) the tile was rendered for.
    pub zoom: u8,
    pub image: Arc<TileImage>,
}

impl Tile {
    pub fn new(col: u32, row: u32, zoom: u8, image: TileImage) -> Self {
        Self {
            col,
            row,
            zoom,
            image: Arc::new(image),
        }
    }

    /// Pack a tile identity into one key: `zoom << 48 | row << 24 | col`.
    ///
    /// Column and row keep their low 24 bits.
    pub fn key(col: u32, row: u32, zoom: u8) -> u64 {
        ((zoom as u64) << 48) | (((row as u64) & 0xFF_FFFF) << 24) | ((col as u64) & 0xFF_FFFF)
    }

    /// This tile's cache key.
    pub fn id(&self) -> u64 {
        Self::key(self.col, self.row, self.zoom)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of tiles currently in the cache.
    pub entry_count: u64,
    /// Maximum number of tiles.
    pub capacity: u64,
    /// Number of lookups served from the cache.
    pub hit_count: u64,
    /// Number of lookups that found nothing.
    pub miss_count: u64,
    /// Number of tiles evicted to make room.
    pub eviction_count: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Fixed-capacity tile store with strict least-recently-used eviction.
///
/// Both `get` and a successful `put` mark the entry as most recently used.
/// A capacity of zero turns `put` into a no-op.
///
/// # Example
///
/// ```ignore
/// use ozmap::{Tile, TileCache};
///
/// let cache = TileCache::new(64);
/// cache.put(Tile::new(3, 4, 6, image));
/// assert!(cache.get(Tile::key(3, 4, 6)).is_some());
/// ```
#[derive(Debug)]
pub struct TileCache {
    /// `None` once destroyed, or when created with zero capacity.
    entries: Mutex<Option<LruCache<u64, Tile>>>,
    capacity: usize,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
}

impl TileCache {
    /// Create a cache holding at most `capacity` tiles.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(NonZeroUsize::new(capacity).map(LruCache::new)),
            capacity,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<LruCache<u64, Tile>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a tile, marking it as most recently used.
    pub fn get(&self, key: u64) -> Option<Tile> {
        let found = self
            .lock()
            .as_mut()
            .and_then(|entries| entries.get(&key).cloned());

        match found {
            Some(_) => self.hit_count.fetch_add(1, Ordering::Relaxed),
            None => self.miss_count.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Check for a tile without touching its recency.
    pub fn contains(&self, key: u64) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|entries| entries.contains(&key))
    }

    /// Insert a tile unless one with the same key is already cached.
    ///
    /// When full, exactly the least recently used tile is evicted.
    pub fn put(&self, tile: Tile) {
        let mut guard = self.lock();
        let Some(entries) = guard.as_mut() else {
            return;
        };

        let key = tile.id();
        if entries.contains(&key) {
            return;
        }

        if let Some((evicted_key, evicted)) = entries.push(key, tile) {
            if evicted_key != key {
                self.eviction_count.fetch_add(1, Ordering::Relaxed);
                drop(evicted);
            }
        }
    }

    /// Drop every cached tile.
    pub fn clear(&self) {
        if let Some(entries) = self.lock().as_mut() {
            entries.clear();
        }
    }

    /// Drop every cached tile and disable the cache.
    pub fn destroy(&self) {
        let mut guard = self.lock();
        if let Some(entries) = guard.as_mut() {
            entries.clear();
        }
        *guard = None;
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity the cache was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len() as u64,
            capacity: self.capacity as u64,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
        }
    }
}

/// Number of tiles to keep for a viewport of `viewport_pixels` pixels.
///
/// `ceil(viewport_pixels / tile_pixels * factor)`.
pub fn capacity_for_viewport(viewport_pixels: u64, tile_width: u32, tile_height: u32, factor: f64) -> usize {
    let tile_pixels = (tile_width as u64 * tile_height as u64).max(1);
    (viewport_pixels as f64 / tile_pixels as f64 * factor).ceil() as usize
}
