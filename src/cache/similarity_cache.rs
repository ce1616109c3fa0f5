//! LRU cache for similarity search results, memory-bounded, with two-phase
//! invalidation support (§4.10).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::cache::compressor;
use crate::cache::key::CacheKey;
use crate::similarity::SimilarityResult;

#[derive(Debug, Clone, Default)]
pub struct CacheMetadata {
    /// Table/context scope this query belongs to, used to group
    /// invalidation-queue entries.
    pub scope: String,
    /// Tags (ngrams or vector fingerprints) this query's result depends on.
    pub tags: std::collections::HashSet<String>,
    pub access_count: u32,
}

struct CacheEntry {
    compressed: Vec<u8>,
    original_size: usize,
    /// Whether `compressed` actually holds LZ4 output, or a raw
    /// `compressor::serialize` payload (`cache.compression_enabled = false`).
    is_compressed: bool,
    query_cost_ms: f64,
    metadata: CacheMetadata,
    invalidated: AtomicBool,
    /// Identity marker used to detect a concurrent re-insert racing with a
    /// lock-upgrade touch; see `lookup`.
    generation: u64,
    created_at: Instant,
    last_accessed: Instant,
}

impl CacheEntry {
    fn memory_usage(&self) -> u64 {
        let tags_bytes: u64 = self.metadata.tags.iter().map(|t| t.capacity() as u64).sum();
        std::mem::size_of::<CacheEntry>() as u64 + self.compressed.capacity() as u64 + tags_bytes
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStatisticsSnapshot {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_misses_invalidated: u64,
    pub cache_misses_not_found: u64,
    pub invalidations_immediate: u64,
    pub invalidations_deferred: u64,
    pub invalidations_batches: u64,
    pub current_entries: u64,
    pub current_memory_bytes: u64,
    pub evictions: u64,
    pub total_cache_hit_time_ms: f64,
    pub total_cache_miss_time_ms: f64,
    pub total_query_saved_time_ms: f64,
}

#[derive(Default)]
struct Statistics {
    total_queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_misses_invalidated: AtomicU64,
    cache_misses_not_found: AtomicU64,
    invalidations_immediate: AtomicU64,
    invalidations_deferred: AtomicU64,
    invalidations_batches: AtomicU64,
    evictions: AtomicU64,
    timing: Mutex<TimingStats>,
}

#[derive(Default)]
struct TimingStats {
    total_cache_hit_time_ms: f64,
    total_cache_miss_time_ms: f64,
    total_query_saved_time_ms: f64,
}

struct Store {
    map: HashMap<CacheKey, CacheEntry>,
    order: Vec<CacheKey>, // front = LRU, back = MRU
    total_memory_bytes: u64,
}

pub type EvictionCallback = Box<dyn Fn(CacheKey) + Send + Sync>;

pub struct SimilarityCache {
    store: RwLock<Store>,
    max_memory_bytes: u64,
    min_query_cost_ms: f64,
    compression_enabled: bool,
    stats: Statistics,
    eviction_callback: Mutex<Option<EvictionCallback>>,
    generation: AtomicU64,
}

impl SimilarityCache {
    pub fn new(max_memory_bytes: u64, min_query_cost_ms: f64, compression_enabled: bool) -> Self {
        Self {
            store: RwLock::new(Store {
                map: HashMap::new(),
                order: Vec::new(),
                total_memory_bytes: 0,
            }),
            max_memory_bytes,
            min_query_cost_ms,
            compression_enabled,
            stats: Statistics::default(),
            eviction_callback: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn set_eviction_callback(&self, callback: EvictionCallback) {
        *self.eviction_callback.lock() = Some(callback);
    }

    pub fn insert(
        &self,
        key: CacheKey,
        results: &[SimilarityResult],
        metadata: CacheMetadata,
        query_cost_ms: f64,
    ) -> bool {
        if query_cost_ms < self.min_query_cost_ms {
            return false;
        }
        let (compressed, original_size, is_compressed) = if self.compression_enabled {
            let Ok((compressed, original_size)) = compressor::compress(results) else {
                return false;
            };
            (compressed, original_size, true)
        } else {
            let raw = compressor::serialize(results);
            let len = raw.len();
            (raw, len, false)
        };

        let now = Instant::now();
        let entry = CacheEntry {
            compressed,
            original_size,
            is_compressed,
            query_cost_ms,
            metadata,
            invalidated: AtomicBool::new(false),
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            created_at: now,
            last_accessed: now,
        };
        let required = entry.memory_usage();
        if required > self.max_memory_bytes {
            return false;
        }

        let mut store = self.store.write();
        if store.map.contains_key(&key) {
            return false;
        }

        if !self.evict_for_space(&mut store, required) {
            return false;
        }

        store.total_memory_bytes += required;
        store.order.push(key);
        store.map.insert(key, entry);
        true
    }

    /// Assumes the write lock is held. Evicts LRU entries until there is
    /// room for `required` additional bytes.
    fn evict_for_space(&self, store: &mut Store, required: u64) -> bool {
        while store.total_memory_bytes + required > self.max_memory_bytes {
            if store.order.is_empty() {
                return false;
            }
            let victim = store.order.remove(0);
            if let Some(entry) = store.map.remove(&victim) {
                store.total_memory_bytes = store.total_memory_bytes.saturating_sub(entry.memory_usage());
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = self.eviction_callback.lock().as_ref() {
                    cb(victim);
                }
            }
        }
        true
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Vec<SimilarityResult>> {
        self.stats.total_queries.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let (compressed, original_size, is_compressed, generation, query_cost_ms) = {
            let store = self.store.read();
            match store.map.get(key) {
                None => {
                    self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                    self.stats.cache_misses_not_found.fetch_add(1, Ordering::Relaxed);
                    self.record_miss_time(start);
                    return None;
                }
                Some(entry) if entry.invalidated.load(Ordering::Acquire) => {
                    self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                    self.stats.cache_misses_invalidated.fetch_add(1, Ordering::Relaxed);
                    self.record_miss_time(start);
                    return None;
                }
                Some(entry) => (
                    entry.compressed.clone(),
                    entry.original_size,
                    entry.is_compressed,
                    entry.generation,
                    entry.query_cost_ms,
                ),
            }
        };

        let decoded = if is_compressed {
            compressor::decompress(&compressed, original_size)
        } else {
            compressor::deserialize(&compressed)
        };
        let Ok(results) = decoded else {
            self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
            self.record_miss_time(start);
            return None;
        };

        // Upgrade to exclusive only to touch LRU position; skip if a
        // concurrent insert raced in under the same key (identity check).
        {
            let mut store = self.store.write();
            let still_current = matches!(store.map.get(key), Some(entry) if entry.generation == generation);
            if still_current {
                let now = Instant::now();
                if let Some(pos) = store.order.iter().position(|k| k == key) {
                    let k = store.order.remove(pos);
                    store.order.push(k);
                }
                if let Some(entry) = store.map.get_mut(key) {
                    entry.last_accessed = now;
                    entry.metadata.access_count += 1;
                }
            }
        }

        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let mut timing = self.stats.timing.lock();
        timing.total_cache_hit_time_ms += elapsed_ms;
        timing.total_query_saved_time_ms += query_cost_ms;
        drop(timing);

        Some(results)
    }

    fn record_miss_time(&self, start: Instant) {
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.stats.timing.lock().total_cache_miss_time_ms += elapsed_ms;
    }

    /// Sets the invalidation flag under the shared lock. O(1), no LRU
    /// movement, no memory accounting change.
    pub fn mark_invalidated(&self, key: &CacheKey) -> bool {
        let store = self.store.read();
        if let Some(entry) = store.map.get(key) {
            entry.invalidated.store(true, Ordering::Release);
            self.stats.invalidations_immediate.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn erase(&self, key: &CacheKey) -> bool {
        let mut store = self.store.write();
        if let Some(entry) = store.map.remove(key) {
            store.total_memory_bytes = store.total_memory_bytes.saturating_sub(entry.memory_usage());
            if let Some(pos) = store.order.iter().position(|k| k == key) {
                store.order.remove(pos);
            }
            self.stats.invalidations_deferred.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        let mut store = self.store.write();
        store.map.clear();
        store.order.clear();
        store.total_memory_bytes = 0;
    }

    /// Erases every entry whose `metadata.scope` equals `scope`.
    pub fn clear_scope(&self, scope: &str) {
        let mut store = self.store.write();
        let victims: Vec<CacheKey> = store
            .map
            .iter()
            .filter(|(_, e)| e.metadata.scope == scope)
            .map(|(k, _)| *k)
            .collect();
        for key in victims {
            if let Some(entry) = store.map.remove(&key) {
                store.total_memory_bytes = store.total_memory_bytes.saturating_sub(entry.memory_usage());
            }
            if let Some(pos) = store.order.iter().position(|k| *k == key) {
                store.order.remove(pos);
            }
        }
    }

    pub fn get_statistics(&self) -> CacheStatisticsSnapshot {
        let store = self.store.read();
        let timing = self.stats.timing.lock();
        CacheStatisticsSnapshot {
            total_queries: self.stats.total_queries.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            cache_misses_invalidated: self.stats.cache_misses_invalidated.load(Ordering::Relaxed),
            cache_misses_not_found: self.stats.cache_misses_not_found.load(Ordering::Relaxed),
            invalidations_immediate: self.stats.invalidations_immediate.load(Ordering::Relaxed),
            invalidations_deferred: self.stats.invalidations_deferred.load(Ordering::Relaxed),
            invalidations_batches: self.stats.invalidations_batches.load(Ordering::Relaxed),
            current_entries: store.map.len() as u64,
            current_memory_bytes: store.total_memory_bytes,
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            total_cache_hit_time_ms: timing.total_cache_hit_time_ms,
            total_cache_miss_time_ms: timing.total_cache_miss_time_ms,
            total_query_saved_time_ms: timing.total_query_saved_time_ms,
        }
    }

    pub fn note_batch_invalidation(&self) {
        self.stats.invalidations_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.read().map.contains_key(key)
    }
}
