//! Bounded memoization for cycle-point/interval arithmetic.
//!
//! Mirrors the original scheduler's `memoize` decorator: a plain map keyed by
//! the string form of the call, capped at [`MEMOIZE_LIMIT`] entries. Once full,
//! new results are computed and returned but simply not inserted, rather than
//! evicting a live entry — callers never pay for a cache miss they didn't cause.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Matches the original's `MEMOIZE_LIMIT`.
pub const MEMOIZE_LIMIT: usize = 10_000;

/// A small string-keyed cache shared by the point/interval arithmetic helpers.
/// Only successful results are worth caching, so callers store the `Ok` value
/// directly and recompute on every error.
pub struct Memo<V> {
    cache: Mutex<LruCache<String, V>>,
}

impl<V: Clone> Memo<V> {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(MEMOIZE_LIMIT).unwrap())),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.cache.lock().get(key).cloned()
    }

    /// Insert `value` under `key`, unless the cache has already reached
    /// [`MEMOIZE_LIMIT`] — the result is still returned to the caller, just
    /// not retained for future lookups.
    pub fn put(&self, key: &str, value: V) {
        let mut cache = self.cache.lock();
        if cache.len() < MEMOIZE_LIMIT || cache.contains(key) {
            cache.put(key.to_string(), value);
        }
    }
}

impl<V: Clone> Default for Memo<V> {
    fn default() -> Self {
        Self::new()
    }
}
