//! Process-local TTL + LRU cache.
//!
//! A flat key/value store used to memoize expensive or repeated reads.
//! Expiry is lazy: an entry past its deadline is removed by the lookup
//! that discovers it, there is no background sweep. When an insert pushes
//! the store over capacity, the single least-recently-used entry is
//! evicted (a full scan; capacity may transiently exceed the bound by
//! more than one entry under heavy insertion).
//!
//! All callers share one key space, so keys should be prefixed by caller
//! identity. The cache is a single-mutator structure and carries no
//! internal locking.

use crate::config::CacheConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// An entry owned exclusively by the cache; never exposed to callers.
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_accessed: Instant,
}

/// TTL + LRU key/value cache.
#[derive(Debug)]
pub struct Cache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    capacity: usize,
    ttl: Duration,
}

impl<V> Cache<V> {
    /// Create a cache with an explicit capacity bound and TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Look up a key.
    ///
    /// Returns `None` if the key is missing or expired; an expired entry
    /// is removed as a side effect of the lookup. A hit refreshes the
    /// entry's last-accessed time.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(entry) => now > entry.expires_at,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.last_accessed = now;
        Some(&entry.value)
    }

    /// Insert or overwrite a key, then evict the least-recently-used
    /// entry if the store is over capacity.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let now = Instant::now();
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                last_accessed: now,
            },
        );

        if self.entries.len() > self.capacity {
            self.evict_lru();
        }
    }

    /// Number of resident entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl<V> Default for Cache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::DEFAULT_CAPACITY, CacheConfig::DEFAULT_TTL)
    }
}
