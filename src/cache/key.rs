//! MD5-based cache key (§3, §4.8).

use std::fmt;

/// 128-bit MD5 digest split into big-endian halves. Equality and ordering
/// are bitwise on the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub hash_high: u64,
    pub hash_low: u64,
}

impl CacheKey {
    pub fn from_fingerprint(fingerprint: &str) -> Self {
        Self::from_bytes(fingerprint.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let digest = md5::compute(bytes);
        let hash_high = u64::from_be_bytes(digest[0..8].try_into().unwrap());
        let hash_low = u64::from_be_bytes(digest[8..16].try_into().unwrap());
        Self { hash_high, hash_low }
    }

    /// 32 lowercase hex digits, `hash_high` first.
    pub fn to_hex(self) -> String {
        format!("{:016x}{:016x}", self.hash_high, self.hash_low)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hashes the raw little-endian bytes of `vector` with MD5 and returns the
/// hex digest, used in place of the vector itself in SIMV fingerprints.
pub fn hash_vector(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    let digest = md5::compute(&bytes);
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_fingerprint_yields_same_key() {
        let a = CacheKey::from_fingerprint("SIM item1:5:fusion");
        let b = CacheKey::from_fingerprint("SIM item1:5:fusion");
        assert_eq!(a, b);
    }

    #[test]
    fn different_fingerprint_yields_different_key() {
        let a = CacheKey::from_fingerprint("SIM item1:5:fusion");
        let b = CacheKey::from_fingerprint("SIM item2:5:fusion");
        assert_ne!(a, b);
    }

    #[test]
    fn hex_is_32_lowercase_digits() {
        let key = CacheKey::from_fingerprint("anything");
        let hex = key.to_hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn vector_hash_is_deterministic() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert_eq!(hash_vector(&v), hash_vector(&v));
    }
}
