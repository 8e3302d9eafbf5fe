//! Time-bounded memo cache for computed statistics.
//!
//! Entries expire by age only; writes to the event log never invalidate
//! them, so a read may be up to one TTL stale.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a live entry, dropping it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.lock();
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), value));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("backend-builder".to_string(), 0.9);
        assert_eq!(cache.get(&"backend-builder".to_string()), Some(0.9));
        assert_eq!(cache.get(&"other".to_string()), None);
    }

    #[test]
    fn test_zero_ttl_never_stores() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert(1u32, "x".to_string());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache = TtlCache::new(Duration::from_millis(5));
        cache.insert(1u32, 7u32);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 0);
    }
}
