//! Event ingestion pipeline: ring buffer, dedup/state caches, per-context
//! event store, and the symmetric co-occurrence index derived from it.

pub mod co_occurrence;
pub mod dedup_cache;
pub mod event_store;
pub mod ring_buffer;

pub use co_occurrence::{CoOccurrenceIndex, DecayScheduler};
pub use dedup_cache::{DedupCache, StateCache};
pub use event_store::EventStore;
pub use ring_buffer::RingBuffer;
