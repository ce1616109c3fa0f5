//! LZ4 compression of cached similarity results (§4.9).
//!
//! The source implementation serializes each result into a fixed 256-byte
//! id slot. This crate adopts length-prefixed ids instead (recorded as a
//! deliberate redesign in DESIGN.md): `u32 id_len, id bytes, f32 score`,
//! concatenated and handed to LZ4 at the default compression level.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::similarity::SimilarityResult;

/// Serializes `results` into the length-prefixed record layout, without
/// compressing. Used when `cache.compression_enabled` is off (§6): the
/// compression decision is per-insert, not a structural property of the
/// cache.
pub fn serialize(results: &[SimilarityResult]) -> Vec<u8> {
    let mut raw = Vec::new();
    for r in results {
        let id_bytes = r.id.as_bytes();
        raw.extend_from_slice(&(id_bytes.len() as u32).to_le_bytes());
        raw.extend_from_slice(id_bytes);
        raw.extend_from_slice(&r.score.to_le_bytes());
    }
    raw
}

/// Reconstructs result records from the raw (uncompressed) record layout.
pub fn deserialize(raw: &[u8]) -> Result<Vec<SimilarityResult>> {
    let mut results = Vec::new();
    let mut cursor = 0usize;
    while cursor < raw.len() {
        if cursor + 4 > raw.len() {
            return Err(Error::InternalError("truncated result record".to_string()));
        }
        let id_len = u32::from_le_bytes(raw[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + id_len + 4 > raw.len() {
            return Err(Error::InternalError("truncated result record".to_string()));
        }
        let id = String::from_utf8(raw[cursor..cursor + id_len].to_vec())
            .map_err(|e| Error::InternalError(format!("invalid utf8 in cached id: {e}")))?;
        cursor += id_len;
        let score = f32::from_le_bytes(raw[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        results.push(SimilarityResult { id, score });
    }
    Ok(results)
}

/// Serializes `results` and LZ4-compresses them. Returns the compressed
/// bytes and the uncompressed (original) byte length.
pub fn compress(results: &[SimilarityResult]) -> Result<(Vec<u8>, usize)> {
    let raw = serialize(results);
    let original_size = raw.len();

    let mut encoder = lz4::EncoderBuilder::new()
        .build(Vec::new())
        .map_err(|e| Error::InternalError(format!("lz4 encoder init failed: {e}")))?;
    encoder
        .write_all(&raw)
        .map_err(|e| Error::InternalError(format!("lz4 compression failed: {e}")))?;
    let (compressed, result) = encoder.finish();
    result.map_err(|e| Error::InternalError(format!("lz4 compression failed: {e}")))?;

    Ok((compressed, original_size))
}

/// Decompresses `compressed` into exactly `original_size` bytes and
/// reconstructs the result records. A size mismatch is an error.
pub fn decompress(compressed: &[u8], original_size: usize) -> Result<Vec<SimilarityResult>> {
    let mut decoder = lz4::Decoder::new(compressed)
        .map_err(|e| Error::InternalError(format!("lz4 decoder init failed: {e}")))?;
    let mut raw = Vec::with_capacity(original_size);
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| Error::InternalError(format!("lz4 decompression failed: {e}")))?;

    if raw.len() != original_size {
        return Err(Error::InternalError(format!(
            "decompressed size mismatch: expected {original_size}, got {}",
            raw.len()
        )));
    }

    let mut results = Vec::new();
    let mut cursor = 0usize;
    while cursor < raw.len() {
        if cursor + 4 > raw.len() {
            return Err(Error::InternalError("truncated result record".to_string()));
        }
        let id_len = u32::from_le_bytes(raw[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + id_len + 4 > raw.len() {
            return Err(Error::InternalError("truncated result record".to_string()));
        }
        let id = String::from_utf8(raw[cursor..cursor + id_len].to_vec())
            .map_err(|e| Error::InternalError(format!("invalid utf8 in cached id: {e}")))?;
        cursor += id_len;
        let score = f32::from_le_bytes(raw[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        results.push(SimilarityResult { id, score });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_results() {
        let results = vec![
            SimilarityResult::new("item-one", 0.9),
            SimilarityResult::new("item-two", 0.5),
        ];
        let (compressed, size) = compress(&results).unwrap();
        let decompressed = decompress(&compressed, size).unwrap();
        assert_eq!(decompressed, results);
    }

    #[test]
    fn empty_input_round_trips_to_empty_output() {
        let (compressed, size) = compress(&[]).unwrap();
        let decompressed = decompress(&compressed, size).unwrap();
        assert!(decompressed.is_empty());
        assert_eq!(size, 0);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let results = vec![SimilarityResult::new("a", 1.0)];
        let (compressed, size) = compress(&results).unwrap();
        assert!(decompress(&compressed, size + 1).is_err());
    }

    #[test]
    fn short_ids_compress_smaller_than_fixed_slot_layout_would() {
        let results = vec![SimilarityResult::new("a", 1.0)];
        let (_, original_size) = compress(&results).unwrap();
        // length-prefixed: 4 (len) + 1 (id) + 4 (score) = 9, versus 260 for a
        // fixed 256-byte id slot.
        assert_eq!(original_size, 9);
    }
}
