//! Similarity search engine: events, vectors, fusion, and free-vector query
//! modes (§4.7).

use crate::config::{DistanceMetric, SimilarityConfig};
use crate::error::{Error, Result};
use crate::events::CoOccurrenceIndex;
use crate::vectors::distance::{cosine_similarity, dot_product, l2_distance};
use crate::vectors::VectorStore;

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityResult {
    pub id: String,
    pub score: f32,
}

impl SimilarityResult {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

pub struct SimilarityEngine<'a> {
    co_index: &'a CoOccurrenceIndex,
    vector_store: &'a VectorStore,
    config: SimilarityConfig,
    metric: DistanceMetric,
}

impl<'a> SimilarityEngine<'a> {
    pub fn new(
        co_index: &'a CoOccurrenceIndex,
        vector_store: &'a VectorStore,
        config: SimilarityConfig,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            co_index,
            vector_store,
            config,
            metric,
        }
    }

    fn validate_top_k(&self, k: i64) -> i64 {
        if k <= 0 {
            return 0;
        }
        k.min(self.config.max_top_k as i64)
    }

    fn metric_score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Dot => dot_product(a, b),
            // Smaller distance = more similar; invert so "higher = more similar" holds.
            DistanceMetric::L2 => -l2_distance(a, b),
        }
    }

    pub fn search_by_id_events(&self, id: &str, k: i64) -> Result<Vec<SimilarityResult>> {
        let k = self.validate_top_k(k);
        Ok(self
            .co_index
            .get_similar(id, k)
            .into_iter()
            .map(|(id, score)| SimilarityResult::new(id, score))
            .collect())
    }

    pub fn search_by_id_vectors(&self, id: &str, k: i64) -> Result<Vec<SimilarityResult>> {
        let query = self
            .vector_store
            .get_vector(id)
            .ok_or_else(|| Error::VectorNotFound(id.to_string()))?;
        let k = self.validate_top_k(k);

        let mut results: Vec<SimilarityResult> = self
            .vector_store
            .get_all()
            .into_iter()
            .filter(|(other_id, _)| other_id != id)
            .map(|(other_id, v)| SimilarityResult::new(other_id, self.metric_score(&query.data, &v.data)))
            .collect();
        sort_and_truncate(&mut results, k);
        Ok(results)
    }

    pub fn search_by_vector(&self, query: &[f32], k: i64) -> Result<Vec<SimilarityResult>> {
        if query.is_empty() {
            return Err(Error::InvalidArgument("query vector must be non-empty".to_string()));
        }
        let dimension = self.vector_store.get_dimension();
        if dimension != 0 && query.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        let k = self.validate_top_k(k);
        let mut results: Vec<SimilarityResult> = self
            .vector_store
            .get_all()
            .into_iter()
            .map(|(id, v)| SimilarityResult::new(id, self.metric_score(query, &v.data)))
            .collect();
        sort_and_truncate(&mut results, k);
        Ok(results)
    }

    pub fn search_by_id_fusion(&self, id: &str, k: i64) -> Result<Vec<SimilarityResult>> {
        let k = self.validate_top_k(k);
        let internal_k = k.max(self.config.default_top_k as i64).min(self.config.max_top_k as i64);

        let vector_results = self.search_by_id_vectors(id, internal_k).unwrap_or_default();
        let event_results = self.search_by_id_events(id, internal_k)?;

        let vector_norm = normalize_min_max(&vector_results);
        let event_norm = normalize_min_max(&event_results);

        let mut combined: std::collections::HashMap<String, f32> = std::collections::HashMap::new();
        for (id, score) in &vector_norm {
            *combined.entry(id.clone()).or_insert(0.0) += self.config.fusion_alpha * score;
        }
        for (id, score) in &event_norm {
            *combined.entry(id.clone()).or_insert(0.0) += self.config.fusion_beta * score;
        }

        let mut results: Vec<SimilarityResult> = combined
            .into_iter()
            .map(|(id, score)| SimilarityResult::new(id, score))
            .collect();
        sort_and_truncate(&mut results, k);
        Ok(results)
    }
}

fn sort_and_truncate(results: &mut Vec<SimilarityResult>, k: i64) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(k.max(0) as usize);
}

/// Min-max normalizes scores to `[0, 1]`. A degenerate range (`max == min`)
/// leaves scores unchanged.
fn normalize_min_max(results: &[SimilarityResult]) -> Vec<(String, f32)> {
    if results.is_empty() {
        return Vec::new();
    }
    let min = results.iter().map(|r| r.score).fold(f32::INFINITY, f32::min);
    let max = results.iter().map(|r| r.score).fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return results.iter().map(|r| (r.id.clone(), r.score)).collect();
    }
    results
        .iter()
        .map(|r| (r.id.clone(), (r.score - min) / (max - min)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_store::StoredEvent;

    fn default_cfg() -> SimilarityConfig {
        SimilarityConfig {
            default_top_k: 10,
            max_top_k: 100,
            fusion_alpha: 0.5,
            fusion_beta: 0.5,
        }
    }

    #[test]
    fn sim1_search_by_id_excludes_self_search_by_vector_may_include() {
        let co = CoOccurrenceIndex::new();
        let vectors = VectorStore::new();
        vectors.set_vector("a", &[1.0, 0.0, 0.0], false).unwrap();
        vectors.set_vector("b", &[0.0, 1.0, 0.0], false).unwrap();
        let engine = SimilarityEngine::new(&co, &vectors, default_cfg(), DistanceMetric::Cosine);

        let by_id = engine.search_by_id_vectors("a", 10).unwrap();
        assert!(by_id.iter().all(|r| r.id != "a"));

        let by_vec = engine.search_by_vector(&[1.0, 0.0, 0.0], 10).unwrap();
        assert!(by_vec.iter().any(|r| r.id == "a"));
    }

    #[test]
    fn vector_round_trip_scenario() {
        let co = CoOccurrenceIndex::new();
        let vectors = VectorStore::new();
        vectors.set_vector("a", &[1.0, 0.0, 0.0], false).unwrap();
        vectors.set_vector("b", &[0.0, 1.0, 0.0], false).unwrap();
        vectors.set_vector("c", &[0.9, 0.1, 0.0], false).unwrap();
        let engine = SimilarityEngine::new(&co, &vectors, default_cfg(), DistanceMetric::Cosine);

        let results = engine.search_by_id_vectors("a", 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c");
        assert_eq!(results[1].id, "b");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn vector_not_found_errors() {
        let co = CoOccurrenceIndex::new();
        let vectors = VectorStore::new();
        let engine = SimilarityEngine::new(&co, &vectors, default_cfg(), DistanceMetric::Cosine);
        assert!(matches!(
            engine.search_by_id_vectors("missing", 5),
            Err(Error::VectorNotFound(_))
        ));
    }

    #[test]
    fn dimension_mismatch_on_free_vector_query() {
        let co = CoOccurrenceIndex::new();
        let vectors = VectorStore::new();
        vectors.set_vector("a", &[1.0, 0.0], false).unwrap();
        let engine = SimilarityEngine::new(&co, &vectors, default_cfg(), DistanceMetric::Cosine);
        assert!(matches!(
            engine.search_by_vector(&[1.0, 0.0, 0.0], 5),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn fusion_combines_events_and_vectors() {
        let co = CoOccurrenceIndex::new();
        co.update_from_events(&[
            StoredEvent { item_id: "a".into(), score: 1, timestamp: 0 },
            StoredEvent { item_id: "b".into(), score: 2, timestamp: 0 },
        ]);
        let vectors = VectorStore::new();
        vectors.set_vector("a", &[1.0, 0.0], false).unwrap();
        vectors.set_vector("b", &[0.0, 1.0], false).unwrap();
        let engine = SimilarityEngine::new(&co, &vectors, default_cfg(), DistanceMetric::Cosine);

        let results = engine.search_by_id_fusion("a", 5).unwrap();
        assert!(results.iter().any(|r| r.id == "b"));
    }

    #[test]
    fn sim2_k_covers_all_stored_is_permutation() {
        let co = CoOccurrenceIndex::new();
        let vectors = VectorStore::new();
        vectors.set_vector("a", &[1.0, 0.0], false).unwrap();
        vectors.set_vector("b", &[0.0, 1.0], false).unwrap();
        vectors.set_vector("c", &[1.0, 1.0], false).unwrap();
        let engine = SimilarityEngine::new(&co, &vectors, default_cfg(), DistanceMetric::Cosine);
        let results = engine.search_by_id_vectors("a", 10).unwrap();
        let mut ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
