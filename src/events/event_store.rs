//! Per-context event history (§4.3).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::events::dedup_cache::{DedupCache, DedupKey};
use crate::events::ring_buffer::RingBuffer;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub item_id: String,
    pub score: i64,
    pub timestamp: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EventStoreStatistics {
    pub active_contexts: u64,
    pub total_events: u64,
    pub deduped_events: u64,
    pub stored_events: u64,
    pub memory_bytes: u64,
}

struct Contexts {
    buffers: HashMap<String, RingBuffer<StoredEvent>>,
    total_events: u64,
    deduped_events: u64,
    stored_events: u64,
}

pub struct EventStore {
    ctx_buffer_size: usize,
    contexts: RwLock<Contexts>,
    dedup: DedupCache,
}

fn wall_clock_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl EventStore {
    pub fn new(ctx_buffer_size: usize, dedup_cache_size: usize, dedup_window_sec: u64) -> Self {
        Self {
            ctx_buffer_size,
            contexts: RwLock::new(Contexts {
                buffers: HashMap::new(),
                total_events: 0,
                deduped_events: 0,
                stored_events: 0,
            }),
            dedup: DedupCache::new(dedup_cache_size, dedup_window_sec),
        }
    }

    pub fn add_event(&self, ctx: &str, item_id: &str, score: i64) -> Result<()> {
        if ctx.is_empty() || item_id.is_empty() {
            return Err(Error::InvalidArgument(
                "ctx and item_id must be non-empty".to_string(),
            ));
        }
        let now = wall_clock_secs();
        let key: DedupKey = (ctx.to_string(), item_id.to_string(), score);

        let mut contexts = self.contexts.write();
        if self.dedup.is_duplicate(&key, now) {
            contexts.deduped_events += 1;
            contexts.total_events += 1;
            return Ok(());
        }
        self.dedup.insert(key, now);

        contexts
            .buffers
            .entry(ctx.to_string())
            .or_insert_with(|| RingBuffer::new(self.ctx_buffer_size))
            .push(StoredEvent {
                item_id: item_id.to_string(),
                score,
                timestamp: now,
            });
        contexts.stored_events += 1;
        contexts.total_events += 1;
        Ok(())
    }

    /// A consistent snapshot of the context's events, oldest first.
    pub fn get_events(&self, ctx: &str) -> Vec<StoredEvent> {
        self.contexts
            .read()
            .buffers
            .get(ctx)
            .map(|rb| rb.get_all())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut contexts = self.contexts.write();
        contexts.buffers.clear();
        contexts.total_events = 0;
        contexts.deduped_events = 0;
        contexts.stored_events = 0;
        self.dedup.clear();
    }

    /// Snapshot of every context's ring buffer contents plus the running
    /// counters, used by the snapshot codec (§4.12). Does not include dedup
    /// cache state: a reloaded store starts with a cold dedup window, which
    /// is safe since dedup only protects against short replay bursts.
    pub fn export_contexts(&self) -> (Vec<(String, Vec<StoredEvent>)>, EventStoreStatistics) {
        let contexts = self.contexts.read();
        let data = contexts
            .buffers
            .iter()
            .map(|(ctx, rb)| (ctx.clone(), rb.get_all()))
            .collect();
        drop(contexts);
        (data, self.statistics())
    }

    /// Replaces the store's contents with a previously exported snapshot.
    /// Events are pushed directly into fresh ring buffers, bypassing the
    /// dedup cache (these are historical facts, not a new ingest stream).
    pub fn load_snapshot(
        &self,
        contexts: Vec<(String, Vec<StoredEvent>)>,
        stats: EventStoreStatistics,
    ) {
        let mut guard = self.contexts.write();
        guard.buffers.clear();
        for (ctx, events) in contexts {
            let mut rb = RingBuffer::new(self.ctx_buffer_size);
            for event in events {
                rb.push(event);
            }
            guard.buffers.insert(ctx, rb);
        }
        guard.total_events = stats.total_events;
        guard.deduped_events = stats.deduped_events;
        guard.stored_events = stats.stored_events;
        drop(guard);
        self.dedup.clear();
    }

    pub fn statistics(&self) -> EventStoreStatistics {
        let contexts = self.contexts.read();
        let memory_bytes: u64 = contexts
            .buffers
            .iter()
            .map(|(ctx, rb)| {
                let entries = rb.size() as u64 * std::mem::size_of::<StoredEvent>() as u64;
                ctx.capacity() as u64 + entries
            })
            .sum();
        EventStoreStatistics {
            active_contexts: contexts.buffers.len() as u64,
            total_events: contexts.total_events,
            deduped_events: contexts.deduped_events,
            stored_events: contexts.stored_events,
            memory_bytes,
        }
    }
}
