//! Thread-safe id -> dense vector storage with fixed dimension (§4.5).

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::vectors::distance::l2_norm;

#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    pub data: Vec<f32>,
    pub normalized: bool,
}

impl Vector {
    pub fn dimension(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VectorStoreStatistics {
    pub vector_count: u64,
    pub dimension: u64,
    pub memory_bytes: u64,
}

struct Inner {
    vectors: HashMap<String, Vector>,
    dimension: usize,
}

pub struct VectorStore {
    inner: RwLock<Inner>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                vectors: HashMap::new(),
                dimension: 0,
            }),
        }
    }

    pub fn set_vector(&self, id: &str, data: &[f32], normalize: bool) -> Result<()> {
        if id.is_empty() || data.is_empty() {
            return Err(Error::InvalidArgument(
                "id and vector must be non-empty".to_string(),
            ));
        }

        let mut vec_data = data.to_vec();
        if normalize {
            let norm = l2_norm(&vec_data);
            if norm == 0.0 {
                return Err(Error::InvalidArgument(
                    "cannot normalize a zero vector".to_string(),
                ));
            }
            for v in &mut vec_data {
                *v /= norm;
            }
        }

        let mut inner = self.inner.write();
        if inner.vectors.is_empty() && inner.dimension == 0 {
            inner.dimension = vec_data.len();
        } else if vec_data.len() != inner.dimension {
            return Err(Error::VectorDimensionMismatch {
                expected: inner.dimension,
                actual: vec_data.len(),
            });
        }

        inner.vectors.insert(
            id.to_string(),
            Vector {
                data: vec_data,
                normalized: normalize,
            },
        );
        Ok(())
    }

    pub fn get_vector(&self, id: &str) -> Option<Vector> {
        self.inner.read().vectors.get(id).cloned()
    }

    pub fn delete_vector(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.vectors.remove(id).is_some();
        if inner.vectors.is_empty() {
            inner.dimension = 0;
        }
        removed
    }

    pub fn has_vector(&self, id: &str) -> bool {
        self.inner.read().vectors.contains_key(id)
    }

    pub fn get_all_ids(&self) -> Vec<String> {
        self.inner.read().vectors.keys().cloned().collect()
    }

    /// Snapshot of every `(id, vector)` pair, used by the similarity engine's
    /// exhaustive scan.
    pub fn get_all(&self) -> Vec<(String, Vector)> {
        self.inner
            .read()
            .vectors
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect()
    }

    pub fn get_vector_count(&self) -> usize {
        self.inner.read().vectors.len()
    }

    pub fn get_dimension(&self) -> usize {
        self.inner.read().dimension
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.vectors.clear();
        inner.dimension = 0;
    }

    /// Replaces the store's contents with a previously exported snapshot.
    pub fn load_snapshot(&self, dimension: usize, vectors: Vec<(String, Vector)>) {
        let mut inner = self.inner.write();
        inner.vectors.clear();
        inner.dimension = dimension;
        for (id, vector) in vectors {
            inner.vectors.insert(id, vector);
        }
    }

    pub fn memory_usage(&self) -> u64 {
        let inner = self.inner.read();
        inner
            .vectors
            .iter()
            .map(|(id, v)| {
                id.capacity() as u64 + (v.data.len() * std::mem::size_of::<f32>()) as u64
            })
            .sum()
    }

    pub fn statistics(&self) -> VectorStoreStatistics {
        let inner = self.inner.read();
        VectorStoreStatistics {
            vector_count: inner.vectors.len() as u64,
            dimension: inner.dimension as u64,
            memory_bytes: self.memory_usage(),
        }
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_fixes_dimension() {
        let store = VectorStore::new();
        store.set_vector("a", &[1.0, 0.0, 0.0], false).unwrap();
        assert_eq!(store.get_dimension(), 3);
    }

    #[test]
    fn vs1_mismatched_dimension_rejected_and_store_unchanged() {
        let store = VectorStore::new();
        store.set_vector("a", &[1.0, 0.0], false).unwrap();
        let err = store.set_vector("b", &[1.0, 0.0, 0.0], false);
        assert!(matches!(err, Err(Error::VectorDimensionMismatch { .. })));
        assert_eq!(store.get_vector_count(), 1);
        assert!(!store.has_vector("b"));
    }

    #[test]
    fn clear_resets_dimension_invariant() {
        let store = VectorStore::new();
        store.set_vector("a", &[1.0, 0.0], false).unwrap();
        store.clear();
        assert_eq!(store.get_dimension(), 0);
        assert_eq!(store.get_vector_count(), 0);
    }

    #[test]
    fn normalize_zero_vector_rejected() {
        let store = VectorStore::new();
        assert!(store.set_vector("a", &[0.0, 0.0], true).is_err());
    }

    #[test]
    fn normalize_scales_to_unit_length() {
        let store = VectorStore::new();
        store.set_vector("a", &[3.0, 4.0], true).unwrap();
        let v = store.get_vector("a").unwrap();
        assert!((l2_norm(&v.data) - 1.0).abs() < 1e-6);
    }
}
