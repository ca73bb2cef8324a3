//! Bounded LRU cache of recently allocated numbers.

use super::types::{Number, NumberKey};
use hashlink::LruCache;
use std::sync::{Mutex, PoisonError};

/// A fixed-capacity, thread-safe LRU map from [`NumberKey`] to the most
/// recently allocated [`Number`].
///
/// The cache is an optimization only. Evicting an entry never loses a
/// value because the in-process table, the pending-flush table and storage
/// are consulted after a miss.
pub struct NumberCache {
    inner: Mutex<LruCache<NumberKey, Number>>,
    capacity: usize,
}

impl NumberCache {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    /// Looks up `key`, marking it most recently used.
    pub fn get(&self, key: &NumberKey) -> Option<Number> {
        self.lock().get(key).copied()
    }

    /// Inserts or replaces `key`, evicting the least recently used entry if
    /// the cache is full.
    pub fn put(&self, key: NumberKey, value: Number) {
        self.lock().insert(key, value);
    }

    /// Removes every entry.
    pub fn purge(&self) {
        self.lock().clear();
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<NumberKey, Number>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for NumberCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NumberCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
