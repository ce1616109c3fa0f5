//! The core, transport-agnostic aggregator: one instance each of the event
//! store, vector store, co-occurrence index, similarity cache, invalidation
//! queue, and thread pool, built from a validated [`Config`] (§10.5).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::cache::key::CacheKey;
use crate::cache::normalizer::{self, CacheableQuery};
use crate::cache::{CacheMetadata, InvalidationQueue, SimilarityCache};
use crate::config::{Config, DistanceMetric};
use crate::error::{Error, Result};
use crate::events::{CoOccurrenceIndex, DecayScheduler, EventStore};
use crate::net::thread_pool::ThreadPool;
use crate::protocol::parser::SimMode;
use crate::similarity::{SimilarityEngine, SimilarityResult};
use crate::snapshot::{self, SnapshotInfo};
use crate::stats::{RuntimeVariableManager, Stats, StatsSnapshot};
use crate::vectors::VectorStore;

/// Tracks which cache keys depend on which item id, so that an `EVENT` or
/// `VECSET` mutation can find every cached result it invalidates. The
/// similarity cache itself only groups by `scope`; this is the per-id
/// reverse index that feeds `InvalidationQueue::enqueue`.
#[derive(Default)]
struct TagIndex {
    by_tag: HashMap<String, HashSet<CacheKey>>,
}

impl TagIndex {
    fn record(&mut self, key: CacheKey, tags: &HashSet<String>) {
        for tag in tags {
            self.by_tag.entry(tag.clone()).or_default().insert(key);
        }
    }

    fn take_keys_for(&mut self, tag: &str) -> Vec<CacheKey> {
        self.by_tag.remove(tag).map(|set| set.into_iter().collect()).unwrap_or_default()
    }
}

/// RAII guard that flips an [`AtomicBool`] on acquire and clears it on drop,
/// used to mark `read_only` during `DUMP SAVE` and `loading` during
/// `DUMP LOAD` regardless of how the operation returns.
struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl<'a> Drop for FlagGuard<'a> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Batches pending to the invalidation queue before `batch_size` or
/// `max_delay_ms` fire; neither is config-exposed today, they're an
/// implementation detail of how aggressively stale entries get pruned.
const INVALIDATION_MAX_DELAY_MS: u64 = 250;

pub struct Engine {
    config: Mutex<Config>,
    pub event_store: EventStore,
    pub vector_store: VectorStore,
    pub co_index: Arc<CoOccurrenceIndex>,
    pub cache: Arc<SimilarityCache>,
    cache_enabled: Arc<AtomicBool>,
    invalidation: Arc<InvalidationQueue>,
    decay: DecayScheduler,
    tag_index: Mutex<TagIndex>,
    pub stats: Stats,
    pub runtime_vars: RuntimeVariableManager,
    pub thread_pool: Arc<ThreadPool>,
    read_only: AtomicBool,
    loading: AtomicBool,
    started_at: Instant,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let event_store = EventStore::new(
            config.events.ctx_buffer_size,
            config.events.dedup_cache_size,
            config.events.dedup_window_sec,
        );
        let vector_store = VectorStore::new();
        let co_index = Arc::new(CoOccurrenceIndex::new());

        // The cache structure is always built, even when `cache.enabled` starts
        // false: `CACHE ENABLE`/`DISABLE` toggle a live `AtomicBool` rather than
        // tearing the structure down, so re-enabling at runtime doesn't need a
        // reallocation and doesn't race the invalidation worker's lifetime.
        let cache = Arc::new(SimilarityCache::new(
            config.cache.max_memory_bytes,
            config.cache.min_query_cost_ms,
            config.cache.compression_enabled,
        ));

        let invalidation = {
            let cache_mark = cache.clone();
            let cache_erase = cache.clone();
            let cache_batch = cache.clone();
            let queue = Arc::new(InvalidationQueue::new(
                config.cache.eviction_batch_size,
                INVALIDATION_MAX_DELAY_MS,
                Box::new(move |k| cache_mark.mark_invalidated(k)),
                Box::new(move |k| cache_erase.erase(k)),
                Box::new(move || cache_batch.note_batch_invalidation()),
            ));
            queue.start();
            queue
        };

        let thread_pool = Arc::new(ThreadPool::new(config.perf.thread_pool_size, config.perf.max_connections));

        let runtime_vars = RuntimeVariableManager::new();
        runtime_vars.register_readonly("server.version", env!("CARGO_PKG_VERSION"));

        let cache_enabled = Arc::new(AtomicBool::new(config.cache.enabled));
        {
            let flag = cache_enabled.clone();
            runtime_vars.on_set(
                "cache.enabled",
                Box::new(move |v| flag.store(v.eq_ignore_ascii_case("true"), Ordering::Release)),
            );
        }
        runtime_vars.set("cache.enabled", if config.cache.enabled { "true" } else { "false" })?;
        runtime_vars.set("cache.min_query_cost_ms", &config.cache.min_query_cost_ms.to_string())?;
        runtime_vars.set("cache.ttl_seconds", &config.cache.ttl_seconds.to_string())?;

        let decay = DecayScheduler::new();
        decay.start(
            co_index.clone(),
            std::time::Duration::from_secs(config.events.decay_interval_sec),
            config.events.decay_alpha,
        );

        Ok(Self {
            config: Mutex::new(config),
            event_store,
            vector_store,
            co_index,
            cache,
            cache_enabled,
            invalidation,
            decay,
            tag_index: Mutex::new(TagIndex::default()),
            stats: Stats::new(),
            runtime_vars,
            thread_pool,
            read_only: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    pub fn config_snapshot(&self) -> Config {
        self.config.lock().clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn invalidate_tag(&self, tag: &str) {
        let keys = self.tag_index.lock().take_keys_for(tag);
        if !keys.is_empty() {
            self.invalidation.enqueue(&keys);
        }
    }

    pub fn record_event(&self, ctx: &str, item_id: &str, score: i64) -> Result<()> {
        if self.is_loading() {
            return Err(Error::InvalidArgument("server is loading a snapshot".to_string()));
        }
        self.event_store.add_event(ctx, item_id, score)?;
        let events = self.event_store.get_events(ctx);
        self.co_index.update_from_events(&events);
        self.invalidate_tag(item_id);
        for event in &events {
            self.invalidate_tag(&event.item_id);
        }
        Ok(())
    }

    pub fn set_vector(&self, id: &str, values: &[f32]) -> Result<()> {
        if self.is_loading() {
            return Err(Error::InvalidArgument("server is loading a snapshot".to_string()));
        }
        self.vector_store.set_vector(id, values, false)?;
        self.invalidate_tag(id);
        Ok(())
    }

    fn similarity_engine(&self) -> SimilarityEngine<'_> {
        let config = self.config.lock();
        SimilarityEngine::new(
            &self.co_index,
            &self.vector_store,
            config.similarity.clone(),
            config.vectors.distance_metric,
        )
    }

    fn cacheable_lookup(&self, fingerprint: &str) -> Option<Vec<SimilarityResult>> {
        if !self.cache_enabled() {
            return None;
        }
        self.cache.lookup(&CacheKey::from_fingerprint(fingerprint))
    }

    fn cacheable_insert(&self, fingerprint: &str, tags: HashSet<String>, results: &[SimilarityResult], cost_ms: f64) {
        if !self.cache_enabled() {
            return;
        }
        let key = CacheKey::from_fingerprint(fingerprint);
        let metadata = CacheMetadata {
            scope: String::new(),
            tags: tags.clone(),
            access_count: 0,
        };
        if self.cache.insert(key, results, metadata, cost_ms) {
            self.tag_index.lock().record(key, &tags);
        }
    }

    pub fn similarity_by_id(&self, id: &str, k: i64, mode: SimMode) -> Result<Vec<SimilarityResult>> {
        let fingerprint = normalizer::normalize(&CacheableQuery::SimById { id, k, mode: mode.as_str() });
        if let Some(hit) = self.cacheable_lookup(&fingerprint) {
            return Ok(hit);
        }

        let start = Instant::now();
        let engine = self.similarity_engine();
        let results = match mode {
            SimMode::Vectors => engine.search_by_id_vectors(id, k)?,
            SimMode::Events => engine.search_by_id_events(id, k)?,
            SimMode::Fusion => engine.search_by_id_fusion(id, k)?,
        };
        let cost_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut tags: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();
        tags.insert(id.to_string());
        self.cacheable_insert(&fingerprint, tags, &results, cost_ms);
        Ok(results)
    }

    pub fn similarity_by_vector(&self, values: &[f32], k: i64) -> Result<Vec<SimilarityResult>> {
        let fingerprint = normalizer::normalize(&CacheableQuery::SimByVector { vector: values, k });
        if let Some(hit) = self.cacheable_lookup(&fingerprint) {
            return Ok(hit);
        }

        let start = Instant::now();
        let engine = self.similarity_engine();
        let results = engine.search_by_vector(values, k)?;
        let cost_ms = start.elapsed().as_secs_f64() * 1000.0;

        let tags: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();
        self.cacheable_insert(&fingerprint, tags, &results, cost_ms);
        Ok(results)
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Acquire)
    }

    pub fn cache_stats(&self) -> Option<crate::cache::CacheStatisticsSnapshot> {
        self.cache_enabled().then(|| self.cache.get_statistics())
    }

    pub fn cache_clear(&self) {
        self.cache.clear();
        self.tag_index.lock().by_tag.clear();
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn resolve_dump_path(&self, requested: Option<&str>) -> Result<std::path::PathBuf> {
        let config = self.config.lock();
        let requested = requested.unwrap_or(&config.snapshot.default_filename);
        snapshot::codec::resolve_path(&config.snapshot.dir, requested)
    }

    pub fn dump_save(&self, requested: Option<&str>) -> Result<std::path::PathBuf> {
        let _guard = FlagGuard::acquire(&self.read_only);
        let path = self.resolve_dump_path(requested)?;
        let config = self.config_snapshot();
        let stats = snapshot::codec::SnapshotStats {
            event_store: self.event_store.statistics().into(),
            co_occurrence: self.co_index.statistics().into(),
            vector_store: self.vector_store.statistics().into(),
        };
        snapshot::codec::write(
            &path,
            &config,
            Some(&stats),
            &self.event_store,
            &self.co_index,
            &self.vector_store,
        )?;
        Ok(path)
    }

    pub fn dump_load(&self, requested: Option<&str>) -> Result<std::path::PathBuf> {
        let _guard = FlagGuard::acquire(&self.loading);
        let path = self.resolve_dump_path(requested)?;
        let loaded = snapshot::codec::read(&path)?;

        self.event_store.load_snapshot(loaded.events, loaded.event_stats);
        self.co_index.load_rows(loaded.co_rows);
        self.vector_store.load_snapshot(loaded.vector_dimension, loaded.vectors);
        *self.config.lock() = loaded.config;
        self.cache_clear();
        Ok(path)
    }

    pub fn dump_verify(&self, requested: Option<&str>) -> Result<()> {
        let path = self.resolve_dump_path(requested)?;
        snapshot::codec::verify(&path)
    }

    pub fn dump_info(&self, requested: Option<&str>) -> Result<SnapshotInfo> {
        let path = self.resolve_dump_path(requested)?;
        snapshot::codec::get_info(&path)
    }

    /// Stops the invalidation worker synchronously, draining any pending
    /// batch, as the last step of an orderly shutdown (§5).
    pub fn shutdown_background_workers(&self) {
        self.invalidation.stop();
        self.decay.stop();
    }

    pub fn snapshot_dir_exists(&self, dir: &Path) -> bool {
        dir.exists()
    }
}

impl From<DistanceMetric> for &'static str {
    fn from(metric: DistanceMetric) -> Self {
        match metric {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
            DistanceMetric::L2 => "l2",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.snapshot.dir = std::env::temp_dir()
            .join(format!("nvecd-engine-test-{:?}", std::thread::current().id()))
            .to_string_lossy()
            .to_string();
        cfg
    }

    #[test]
    fn vecset_then_sim_round_trips() {
        let engine = Engine::new(test_config()).unwrap();
        engine.set_vector("a", &[1.0, 0.0, 0.0]).unwrap();
        engine.set_vector("b", &[0.0, 1.0, 0.0]).unwrap();
        engine.set_vector("c", &[0.9, 0.1, 0.0]).unwrap();
        let results = engine.similarity_by_id("a", 2, SimMode::Vectors).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c");
    }

    #[test]
    fn vector_mutation_invalidates_cached_result() {
        let engine = Engine::new(test_config()).unwrap();
        engine.set_vector("a", &[1.0, 0.0]).unwrap();
        engine.set_vector("b", &[0.0, 1.0]).unwrap();
        let first = engine.similarity_by_id("a", 5, SimMode::Vectors).unwrap();
        assert!(!first.is_empty());

        let before = engine.cache_stats().unwrap();
        assert_eq!(before.cache_misses, 1);

        engine.set_vector("b", &[1.0, 1.0]).unwrap();
        let _ = engine.similarity_by_id("a", 5, SimMode::Vectors).unwrap();
        let after = engine.cache_stats().unwrap();
        assert!(after.cache_misses >= 2, "mutating b should have invalidated the cached query for a");
    }

    #[test]
    fn dump_save_then_load_round_trips_state() {
        let engine = Engine::new(test_config()).unwrap();
        engine.set_vector("a", &[1.0, 2.0, 3.0]).unwrap();
        engine.record_event("u1", "item1", 5).unwrap();
        let path = engine.dump_save(Some("engine-roundtrip.dmp")).unwrap();

        let engine2 = Engine::new(test_config()).unwrap();
        engine2.dump_load(Some(path.to_str().unwrap())).unwrap();
        assert!(engine2.vector_store.has_vector("a"));
        assert_eq!(engine2.event_store.get_events("u1").len(), 1);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn loading_flag_rejects_mutation() {
        let engine = Engine::new(test_config()).unwrap();
        engine.loading.store(true, Ordering::Release);
        assert!(engine.set_vector("a", &[1.0]).is_err());
        assert!(engine.record_event("u", "a", 1).is_err());
    }
}
