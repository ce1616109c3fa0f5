//! Symmetric co-occurrence matrix with decay (§4.4).

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::RwLock;

use crate::events::event_store::StoredEvent;

#[derive(Debug, Default, Clone, Copy)]
pub struct CoOccurrenceStatistics {
    pub tracked_ids: u64,
    pub co_pairs: u64,
    pub memory_bytes: u64,
}

struct Matrix {
    rows: HashMap<String, HashMap<String, f32>>,
}

impl Matrix {
    fn add_pair(&mut self, a: &str, b: &str, delta: f32) {
        *self
            .rows
            .entry(a.to_string())
            .or_default()
            .entry(b.to_string())
            .or_insert(0.0) += delta;
    }
}

pub struct CoOccurrenceIndex {
    matrix: RwLock<Matrix>,
}

impl CoOccurrenceIndex {
    pub fn new() -> Self {
        Self {
            matrix: RwLock::new(Matrix {
                rows: HashMap::new(),
            }),
        }
    }

    /// Every unordered, distinct-id pair in `events` contributes
    /// `score(a) * score(b)` to both `M[a][b]` and `M[b][a]`.
    pub fn update_from_events(&self, events: &[StoredEvent]) {
        if events.len() < 2 {
            return;
        }
        let mut matrix = self.matrix.write();
        for i in 0..events.len() {
            for j in (i + 1)..events.len() {
                let (a, b) = (&events[i], &events[j]);
                if a.item_id == b.item_id {
                    continue;
                }
                let delta = (a.score * b.score) as f32;
                matrix.add_pair(&a.item_id, &b.item_id, delta);
                matrix.add_pair(&b.item_id, &a.item_id, delta);
            }
        }
    }

    pub fn get_similar(&self, item_id: &str, k: i64) -> Vec<(String, f32)> {
        if k <= 0 {
            return Vec::new();
        }
        let matrix = self.matrix.read();
        let Some(neighbors) = matrix.rows.get(item_id) else {
            return Vec::new();
        };
        let mut results: Vec<(String, f32)> = neighbors
            .iter()
            .filter(|(_, &score)| score > 0.0)
            .map(|(id, &score)| (id.clone(), score))
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k as usize);
        results
    }

    pub fn get_score(&self, a: &str, b: &str) -> f32 {
        self.matrix
            .read()
            .rows
            .get(a)
            .and_then(|row| row.get(b))
            .copied()
            .unwrap_or(0.0)
    }

    /// No-op when `alpha` is outside `(0, 1]`.
    pub fn apply_decay(&self, alpha: f32) {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return;
        }
        let mut matrix = self.matrix.write();
        for row in matrix.rows.values_mut() {
            for score in row.values_mut() {
                *score *= alpha;
            }
        }
    }

    pub fn clear(&self) {
        self.matrix.write().rows.clear();
    }

    /// Snapshot of every row, used by the snapshot codec (§4.12).
    pub fn export_rows(&self) -> Vec<(String, Vec<(String, f32)>)> {
        self.matrix
            .read()
            .rows
            .iter()
            .map(|(id, row)| (id.clone(), row.iter().map(|(n, &s)| (n.clone(), s)).collect()))
            .collect()
    }

    /// Replaces the matrix's contents with a previously exported snapshot.
    pub fn load_rows(&self, rows: Vec<(String, Vec<(String, f32)>)>) {
        let mut matrix = self.matrix.write();
        matrix.rows.clear();
        for (id, row) in rows {
            matrix.rows.insert(id, row.into_iter().collect());
        }
    }

    pub fn get_all_items(&self) -> Vec<String> {
        self.matrix.read().rows.keys().cloned().collect()
    }

    pub fn get_item_count(&self) -> usize {
        self.matrix.read().rows.len()
    }

    pub fn memory_usage(&self) -> u64 {
        let matrix = self.matrix.read();
        let mut bytes = 0u64;
        for (id, row) in &matrix.rows {
            bytes += id.capacity() as u64;
            bytes += row.len() as u64 * (std::mem::size_of::<f32>() as u64 + 32);
        }
        bytes
    }

    pub fn statistics(&self) -> CoOccurrenceStatistics {
        let matrix = self.matrix.read();
        let co_pairs: u64 = matrix.rows.values().map(|r| r.len() as u64).sum::<u64>() / 2;
        CoOccurrenceStatistics {
            tracked_ids: matrix.rows.len() as u64,
            co_pairs,
            memory_bytes: self.memory_usage(),
        }
    }
}

impl Default for CoOccurrenceIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic maintenance loop applying `events.decay_alpha` to the
/// co-occurrence matrix every `events.decay_interval_sec`, keeping stale
/// pairs from dominating event-based similarity forever. Grounded on the
/// same dedicated-worker-thread-plus-condvar shape as
/// `InvalidationQueue`'s drain worker (§4.11) rather than a raw
/// `thread::sleep` loop, so shutdown is a clean join instead of a detach.
pub struct DecayScheduler {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DecayScheduler {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
            worker: Mutex::new(None),
        }
    }

    /// `interval` of zero disables the scheduler (no worker thread spawned).
    pub fn start(&self, index: Arc<CoOccurrenceIndex>, interval: Duration, alpha: f32) {
        if interval.is_zero() {
            return;
        }
        let shutdown = self.shutdown.clone();
        let handle = thread::spawn(move || loop {
            let (lock, cvar) = &*shutdown;
            let guard = lock.lock().unwrap();
            let (guard, timeout) = cvar.wait_timeout(guard, interval).unwrap();
            if *guard {
                return;
            }
            drop(guard);
            if timeout.timed_out() {
                index.apply_decay(alpha);
            }
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        {
            let (lock, cvar) = &*self.shutdown;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.join().ok();
        }
    }
}

impl Default for DecayScheduler {
    fn default() -> Self {
        Self::new()
    }
}
