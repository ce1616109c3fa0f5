//! Canonical request fingerprint builder for cacheable SIM/SIMV queries
//! (§4.8).
//!
//! The whitespace-collapsing rule, including the U+3000 full-width space
//! byte sequence, and the "sort repeated lists lexicographically" rule are
//! carried over unchanged from the source implementation's query
//! normalizer, re-expressed here for nvecd's own field set (command
//! keyword, identifiers, `k`, mode, vector hash) rather than the original's
//! SQL-flavored AND/NOT/filter/sort clauses.

use crate::cache::key::hash_vector;

#[derive(Debug, Clone)]
pub enum CacheableQuery<'a> {
    SimById { id: &'a str, k: i64, mode: &'a str },
    SimByVector { vector: &'a [f32], k: i64 },
}

/// Builds the canonical fingerprint string for a cacheable query. Returns
/// `None` for anything not covered by `CacheableQuery` (nothing else is
/// cacheable).
pub fn normalize(query: &CacheableQuery) -> String {
    match query {
        CacheableQuery::SimById { id, k, mode } => {
            format!("SIM {} {} {}", normalize_text(id), k, mode.to_lowercase())
        }
        CacheableQuery::SimByVector { vector, k } => {
            format!("SIMV {} {}", hash_vector(vector), k)
        }
    }
}

/// Collapses runs of ASCII whitespace and the UTF-8 encoding of U+3000
/// (full-width space, bytes `0xE3 0x80 0x80`) into single ASCII spaces, and
/// trims a trailing space.
pub fn normalize_text(text: &str) -> String {
    const FW1: u8 = 0xE3;
    const FW2: u8 = 0x80;
    const FW3: u8 = 0x80;

    let bytes = text.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut prev_was_space = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let (is_space, advance) = if b.is_ascii_whitespace() {
            (true, 1)
        } else if i + 2 < bytes.len() && b == FW1 && bytes[i + 1] == FW2 && bytes[i + 2] == FW3 {
            (true, 3)
        } else {
            (false, 1)
        };

        if is_space {
            if !prev_was_space && !out.is_empty() {
                out.push(b' ');
                prev_was_space = true;
            }
        } else {
            out.push(b);
            prev_was_space = false;
        }
        i += advance;
    }

    if out.last() == Some(&b' ') {
        out.pop();
    }
    String::from_utf8(out).unwrap_or_default()
}

/// Sorts a list of terms lexicographically so semantically identical
/// queries produce identical fingerprints regardless of client-side order.
pub fn sorted_terms(terms: &[String]) -> Vec<String> {
    let mut sorted = terms.to_vec();
    sorted.sort();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_ascii_whitespace() {
        assert_eq!(normalize_text("a   b\tc\n"), "a b c");
    }

    #[test]
    fn collapses_fullwidth_space() {
        let text = "a\u{3000}\u{3000}b";
        assert_eq!(normalize_text(text), "a b");
    }

    #[test]
    fn mixed_ascii_and_fullwidth_collapse_identically() {
        let text = "a \u{3000} b";
        assert_eq!(normalize_text(text), "a b");
    }

    #[test]
    fn command_keyword_uppercase_identifiers_verbatim() {
        let fp = normalize(&CacheableQuery::SimById { id: "Item1", k: 5, mode: "Fusion" });
        assert_eq!(fp, "SIM Item1 5 fusion");
    }

    #[test]
    fn sim_by_vector_uses_hash_not_raw_floats() {
        let fp = normalize(&CacheableQuery::SimByVector { vector: &[1.0, 2.0], k: 3 });
        assert!(fp.starts_with("SIMV "));
        assert!(!fp.contains("1.0"));
    }

    #[test]
    fn terms_sorted_lexicographically() {
        let terms = vec!["zeta".to_string(), "alpha".to_string()];
        assert_eq!(sorted_terms(&terms), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
