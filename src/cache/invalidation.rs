//! Two-phase invalidation queue (§4.11).
//!
//! The source manager holds a raw back-pointer to the query cache it
//! invalidates, a cyclic-ownership smell noted in DESIGN.md. This queue
//! instead owns only the closures it needs (`mark_invalidated`, `erase`,
//! `on_batch`), handed in at construction time by whoever owns both the
//! cache and the queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cache::key::CacheKey;

pub type MarkInvalidatedFn = Box<dyn Fn(&CacheKey) -> bool + Send + Sync>;
pub type EraseFn = Box<dyn Fn(&CacheKey) -> bool + Send + Sync>;
pub type OnBatchFn = Box<dyn Fn() + Send + Sync>;

struct Pending {
    entries: HashMap<CacheKey, Instant>,
}

struct Shared {
    pending: Mutex<Pending>,
    condvar: Condvar,
    running: AtomicBool,
    batches_fired: AtomicU64,
    mark_invalidated: MarkInvalidatedFn,
    erase: EraseFn,
    on_batch: OnBatchFn,
    batch_size: usize,
    max_delay_ms: u64,
}

pub struct InvalidationQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationQueue {
    pub fn new(
        batch_size: usize,
        max_delay_ms: u64,
        mark_invalidated: MarkInvalidatedFn,
        erase: EraseFn,
        on_batch: OnBatchFn,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(Pending { entries: HashMap::new() }),
                condvar: Condvar::new(),
                running: AtomicBool::new(false),
                batches_fired: AtomicU64::new(0),
                mark_invalidated,
                erase,
                on_batch,
                batch_size: batch_size.max(1),
                max_delay_ms: max_delay_ms.max(1),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let shared = self.shared.clone();
        let handle = std::thread::spawn(move || worker_loop(shared));
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        if self
            .shared
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.shared.condvar.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.drain_synchronously();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Phase 1 (immediate mark) + Phase 2 (deferred erase scheduling) for
    /// every key in `affected_keys`.
    pub fn enqueue(&self, affected_keys: &[CacheKey]) {
        for key in affected_keys {
            (self.shared.mark_invalidated)(key);
        }

        if !self.is_running() {
            for key in affected_keys {
                (self.shared.erase)(key);
            }
            self.shared.batches_fired.fetch_add(1, Ordering::Relaxed);
            (self.shared.on_batch)();
            return;
        }

        let now = Instant::now();
        let should_notify = {
            let mut pending = self.shared.pending.lock().unwrap();
            for key in affected_keys {
                pending.entries.insert(*key, now);
            }
            pending.entries.len() >= self.shared.batch_size
        };
        if should_notify {
            self.shared.condvar.notify_all();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().unwrap().entries.len()
    }

    pub fn batches_fired(&self) -> u64 {
        self.shared.batches_fired.load(Ordering::Relaxed)
    }

    fn drain_synchronously(&self) {
        let batch: Vec<CacheKey> = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.entries.drain().map(|(k, _)| k).collect()
        };
        if batch.is_empty() {
            return;
        }
        for key in &batch {
            (self.shared.erase)(key);
        }
        self.shared.batches_fired.fetch_add(1, Ordering::Relaxed);
        (self.shared.on_batch)();
    }
}

impl Drop for InvalidationQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let max_delay = Duration::from_millis(shared.max_delay_ms);
    loop {
        let batch = {
            let mut pending = shared.pending.lock().unwrap();
            loop {
                if !shared.running.load(Ordering::Acquire) {
                    return;
                }
                if pending.entries.len() >= shared.batch_size {
                    break;
                }
                let oldest = pending.entries.values().min().copied();
                if let Some(oldest) = oldest {
                    let deadline = oldest + max_delay;
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, timeout) = shared
                        .condvar
                        .wait_timeout(pending, deadline - now)
                        .unwrap();
                    pending = guard;
                    if timeout.timed_out() {
                        continue;
                    }
                } else {
                    pending = shared.condvar.wait(pending).unwrap();
                }
            }
            pending.entries.drain().map(|(k, _)| k).collect::<Vec<_>>()
        };

        if !batch.is_empty() {
            for key in &batch {
                (shared.erase)(key);
            }
            shared.batches_fired.fetch_add(1, Ordering::Relaxed);
            (shared.on_batch)();
        }
    }
}
