//! Pluggable distance kernels (§4.6).
//!
//! The scalar implementations are the authoritative reference; an
//! accelerated path (not implemented here — CPU feature detection and SIMD
//! kernels are out of scope per SPEC_FULL.md §1) would need to stay within
//! `1e-4` absolute tolerance of these.

/// The trio of pure distance functions callers obtain through one
/// accessor (`Kernels::scalar()`), chosen once at startup in a full build
/// based on detected CPU features.
pub struct Kernels;

impl Kernels {
    pub fn scalar() -> &'static Kernels {
        &Kernels
    }

    pub fn dot_product(&self, a: &[f32], b: &[f32]) -> f32 {
        dot_product(a, b)
    }

    pub fn l2_norm(&self, a: &[f32]) -> f32 {
        l2_norm(a)
    }

    pub fn l2_distance(&self, a: &[f32], b: &[f32]) -> f32 {
        l2_distance(a, b)
    }
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(a: &[f32]) -> f32 {
    dot_product(a, a).sqrt()
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// `dot / (||a|| * ||b||)`, `0.0` if either magnitude is zero or the
/// dimensions disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let na = l2_norm(a);
    let nb = l2_norm(b);
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot_product(a, b) / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_product_orthogonal_is_zero() {
        assert_eq!(dot_product(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn l2_norm_of_unit_vector() {
        assert!((l2_norm(&[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_dimension_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
    }

    proptest::proptest! {
        #[test]
        fn l2_distance_is_symmetric(a in proptest::collection::vec(-10.0f32..10.0, 1..8),
                                     b in proptest::collection::vec(-10.0f32..10.0, 1..8)) {
            if a.len() == b.len() {
                proptest::prop_assert!((l2_distance(&a, &b) - l2_distance(&b, &a)).abs() < 1e-3);
            }
        }
    }
}
