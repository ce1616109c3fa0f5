//! Streaming-event deduplication and idempotent state caches (§4.2).

use std::collections::HashMap;

use parking_lot::RwLock;

/// `(ctx, item_id, score)` — identifies a candidate streaming duplicate.
pub type DedupKey = (String, String, i64);

/// Score sentinel recorded by `StateCache::mark_deleted`.
pub const DELETED_SENTINEL: i64 = i64::MIN;

#[derive(Debug, Default, Clone, Copy)]
pub struct DedupStatistics {
    pub hits: u64,
    pub misses: u64,
}

/// Generic fixed-size LRU map shared by `DedupCache` and `StateCache`. Not
/// exposed outside this module; each wrapper picks the key/value types the
/// spec calls for.
struct Inner<K, V> {
    values: HashMap<K, V>,
    order: Vec<K>, // front = LRU, back = MRU
    capacity: usize,
    stats: DedupStatistics,
}

impl<K: Clone + Eq + std::hash::Hash, V: Copy> Inner<K, V> {
    fn touch_mru(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn upsert(&mut self, key: K, value: V) {
        if self.values.contains_key(&key) {
            self.touch_mru(&key);
        } else if self.values.len() >= self.capacity {
            if !self.order.is_empty() {
                let lru = self.order.remove(0);
                self.values.remove(&lru);
            }
            self.order.push(key.clone());
        } else {
            self.order.push(key.clone());
        }
        self.values.insert(key, value);
    }

    fn get(&self, key: &K) -> Option<V> {
        self.values.get(key).copied()
    }
}

/// Detects whether a recently-seen `(ctx, item_id, score)` triple is a
/// streaming duplicate within a configured time window.
pub struct DedupCache {
    inner: RwLock<Inner<DedupKey, u64>>,
    window_sec: u64,
}

impl DedupCache {
    pub fn new(size: usize, window_sec: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                values: HashMap::new(),
                order: Vec::new(),
                capacity: size.max(1),
                stats: DedupStatistics::default(),
            }),
            window_sec,
        }
    }

    /// `window_sec == 0` disables deduplication entirely: always returns
    /// `false` and never records the key.
    pub fn is_duplicate(&self, key: &DedupKey, now: u64) -> bool {
        if self.window_sec == 0 {
            return false;
        }
        let mut inner = self.inner.write();
        let dup = match inner.get(key) {
            Some(ts) => now.saturating_sub(ts) <= self.window_sec,
            None => false,
        };
        if dup {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        dup
    }

    /// Upserts the key's timestamp and promotes it to MRU, evicting the LRU
    /// entry if the cache is at capacity. No-op when deduplication is
    /// disabled (`window_sec == 0`).
    pub fn insert(&self, key: DedupKey, ts: u64) {
        if self.window_sec == 0 {
            return;
        }
        self.inner.write().upsert(key, ts);
    }

    pub fn statistics(&self) -> DedupStatistics {
        self.inner.read().stats
    }

    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.values.clear();
        inner.order.clear();
        inner.stats = DedupStatistics::default();
    }
}

/// `(ctx, item_id) -> last_score`, used for idempotent SET/DEL semantics.
pub type StateKey = (String, String);

pub struct StateCache {
    inner: RwLock<Inner<StateKey, i64>>,
}

impl StateCache {
    pub fn new(size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                values: HashMap::new(),
                order: Vec::new(),
                capacity: size.max(1),
                stats: DedupStatistics::default(),
            }),
        }
    }

    pub fn is_duplicate_set(&self, key: &StateKey, score: i64) -> bool {
        self.inner.read().get(key) == Some(score)
    }

    pub fn is_duplicate_del(&self, key: &StateKey) -> bool {
        self.inner.read().get(key) == Some(DELETED_SENTINEL)
    }

    pub fn update_score(&self, key: StateKey, score: i64) {
        self.inner.write().upsert(key, score);
    }

    pub fn mark_deleted(&self, key: StateKey) {
        self.inner.write().upsert(key, DELETED_SENTINEL);
    }

    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.values.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_window_never_deduplicates() {
        let cache = DedupCache::new(10, 0);
        let key = ("ctx".into(), "item".into(), 1);
        cache.insert(key.clone(), 100);
        assert!(!cache.is_duplicate(&key, 100));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn detects_duplicate_within_window_inclusive() {
        let cache = DedupCache::new(10, 60);
        let key = ("ctx".into(), "item".into(), 1);
        cache.insert(key.clone(), 1000);
        assert!(cache.is_duplicate(&key, 1060));
        assert!(!cache.is_duplicate(&key, 1061));
    }

    #[test]
    fn evicts_lru_at_capacity() {
        let cache = DedupCache::new(2, 100);
        let a = ("c".into(), "a".into(), 1);
        let b = ("c".into(), "b".into(), 1);
        let c = ("c".into(), "c".into(), 1);
        cache.insert(a.clone(), 1);
        cache.insert(b.clone(), 1);
        cache.insert(c.clone(), 1);
        assert_eq!(cache.len(), 2);
        assert!(!cache.is_duplicate(&a, 1));
    }

    #[test]
    fn state_cache_set_idempotency() {
        let cache = StateCache::new(10);
        let key = ("ctx".into(), "item".into());
        cache.update_score(key.clone(), 42);
        assert!(cache.is_duplicate_set(&key, 42));
        assert!(!cache.is_duplicate_set(&key, 43));
    }

    #[test]
    fn state_cache_del_idempotency() {
        let cache = StateCache::new(10);
        let key = ("ctx".into(), "item".into());
        cache.mark_deleted(key.clone());
        assert!(cache.is_duplicate_del(&key));
    }
}
