//! Bounded least-recently-used cache for marshalled content values.
//!
//! Content-rendering code resolves models by identifier repeatedly while the
//! user scrolls; [`ModelCache`] memoizes the marshalled value so the same
//! object is not re-fetched and re-parsed. Eviction is by capacity only,
//! never by time.

use std::collections::{HashMap, VecDeque};

/// Capacity used by [`ModelCache::new`].
pub const DEFAULT_CAPACITY: usize = 100;

/// String-keyed LRU cache with a fixed capacity.
///
/// `get` is a side-effecting read: a hit promotes the key to the
/// most-recently-used position, so lookup order changes eviction order.
///
/// Invariants: the backing storage and the recency queue always hold the
/// same key set, the queue contains no duplicates, and after any `set` the
/// size never exceeds the configured capacity.
pub struct ModelCache<V> {
    storage: HashMap<String, V>,
    /// Recency queue, least-recently-used key at the front.
    recency: VecDeque<String>,
    capacity: usize,
}

impl<V> ModelCache<V> {
    /// Creates a cache with [`DEFAULT_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            storage: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Looks up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        if !self.storage.contains_key(key) {
            return None;
        }
        self.promote(key);
        self.storage.get(key)
    }

    /// Stores or overwrites `key`, promotes it, then evicts from the
    /// least-recently-used end until the cache fits its capacity.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        self.storage.insert(key.clone(), value);
        self.promote(&key);
        while self.storage.len() > self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.storage.remove(&oldest);
            }
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    fn promote(&mut self, key: &str) {
        if let Some(position) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(position);
        }
        self.recency.push_back(key.to_string());
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert_eq!(self.storage.len(), self.recency.len());
        assert!(self.storage.len() <= self.capacity);
        let unique: std::collections::HashSet<&String> = self.recency.iter().collect();
        assert_eq!(unique.len(), self.recency.len());
        for key in &self.recency {
            assert!(self.storage.contains_key(key));
        }
    }
}

impl<V> Default for ModelCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
