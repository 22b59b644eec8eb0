//! Bounded in-memory cache with TTL eviction.
//!
//! An explicit, capacity-limited key/value table owned by whoever
//! constructs it; nothing here is process-global. Serves the advisory
//! quote path only, so a stale entry can never affect what gets charged.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct BoundedCache<V> {
    store: RwLock<HashMap<String, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        {
            let store = self.store.read().expect("cache lock poisoned");
            match store.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it on the way out.
        let mut store = self.store.write().expect("cache lock poisoned");
        store.remove(key);
        None
    }

    pub fn insert(&self, key: String, value: V) {
        let now = Instant::now();
        let mut store = self.store.write().expect("cache lock poisoned");
        if store.len() >= self.capacity && !store.contains_key(&key) {
            store.retain(|_, entry| entry.expires_at > now);
        }
        if store.len() >= self.capacity && !store.contains_key(&key) {
            // Still full after dropping expired entries: evict the oldest.
            if let Some(oldest) = store
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone())
            {
                store.remove(&oldest);
            }
        }
        store.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.store.read().expect("cache lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_miss_after_ttl() {
        let cache = BoundedCache::new(4, Duration::from_millis(10));
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get("a"), Some(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn capacity_is_enforced_by_eviction() {
        let cache = BoundedCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn reinserting_a_key_does_not_evict_others() {
        let cache = BoundedCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }
}
