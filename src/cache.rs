//! Bounded caches shared across report runs.
//!
//! Lookups that are expensive and stable (application records, ticket
//! comments) go through the [`Cache`] trait so tests can swap in their own
//! instance and callers can invalidate entries explicitly.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimal cache interface.
pub trait Cache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn set(&self, key: K, value: V);
    fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }
    fn invalidate(&self, key: &K);
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// DashMap-backed cache with a capacity bound and optional TTL.
///
/// When full, the entry inserted longest ago is evicted.
pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        self.ttl
            .map(|ttl| entry.inserted_at.elapsed() >= ttl)
            .unwrap_or(false)
    }

    fn oldest_key(&self) -> Option<K> {
        self.entries
            .iter()
            .min_by_key(|e| e.value().inserted_at)
            .map(|e| e.key().clone())
    }
}

impl<K, V> Cache<K, V> for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if !self.is_expired(&entry) {
                return Some(entry.value.clone());
            }
        }

        self.invalidate(key);
        None
    }

    fn set(&self, key: K, value: V) {
        // Expired entries are dropped by `has`, which may free a slot.
        if !self.has(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self.oldest_key() {
                self.invalidate(&oldest);
                debug!("Cache full, evicted oldest entry");
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }
}
