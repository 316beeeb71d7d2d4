//! Bounded cache with per-entry expiry.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::clock::SharedClock;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

/// A capacity-bounded map whose entries expire.
///
/// Expired entries are dropped when read. When full, expired entries are purged
/// first, then the oldest insertion is evicted.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, Slot<V>>,
    default_ttl: Duration,
    capacity: usize,
    clock: SharedClock,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache. A capacity of zero is treated as one.
    pub fn new(capacity: usize, default_ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Get a live entry.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some(slot) if slot.expires_at > now => Some(slot.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert with the default lifetime.
    pub fn insert(&mut self, key: K, value: V) {
        let ttl = self.default_ttl;
        self.insert_with_ttl(key, value, ttl);
    }

    /// Insert with an explicit lifetime.
    pub fn insert_with_ttl(&mut self, key: K, value: V, ttl: Duration) {
        let now = self.clock.now();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            Slot {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|slot| slot.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, including ones that expired but were not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at > now);
        before - self.entries.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.inserted_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
