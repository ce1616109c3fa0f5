//! Constants and small serialization helpers shared by the Version 1
//! snapshot codec (§4.12).

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

pub const MAGIC: [u8; 4] = *b"NVEC";
pub const VERSION: u32 = 1;
pub const MIN_SUPPORTED_VERSION: u32 = 1;
pub const MAX_SUPPORTED_VERSION: u32 = 1;

pub const MAX_STRING_LEN: u32 = 256 * 1024 * 1024;

pub const FLAG_WITH_STATISTICS: u32 = 0x1;

pub const STORE_COUNT: u32 = 3;
pub const STORE_NAME_EVENTS: &str = "event_store";
pub const STORE_NAME_CO_OCCURRENCE: &str = "co_occurrence_index";
pub const STORE_NAME_VECTORS: &str = "vector_store";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    None,
    FileCrc,
    ConfigCrc,
    StatsCrc,
    StoreStatsCrc { store: String },
    EventStoreCrc,
    CoOccurrenceCrc,
    VectorStoreCrc,
}

impl IntegrityError {
    pub fn message(&self) -> String {
        match self {
            IntegrityError::None => "no integrity error".to_string(),
            IntegrityError::FileCrc => "file-level CRC32 mismatch".to_string(),
            IntegrityError::ConfigCrc => "config section CRC32 mismatch".to_string(),
            IntegrityError::StatsCrc => "statistics section CRC32 mismatch".to_string(),
            IntegrityError::StoreStatsCrc { store } => format!("store statistics CRC32 mismatch: {store}"),
            IntegrityError::EventStoreCrc => "event store section CRC32 mismatch".to_string(),
            IntegrityError::CoOccurrenceCrc => "co-occurrence index section CRC32 mismatch".to_string(),
            IntegrityError::VectorStoreCrc => "vector store section CRC32 mismatch".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeaderV1 {
    pub header_size: u32,
    pub flags: u32,
    pub snapshot_timestamp: u64,
    pub total_file_size: u64,
    pub file_crc32: u32,
    pub reserved: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotInfo {
    pub version: u32,
    pub store_count: u32,
    pub flags: u32,
    pub file_size: u64,
    pub timestamp: u64,
    pub has_statistics: bool,
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

pub fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = read_u32(r).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    if len > MAX_STRING_LEN {
        return Err(Error::SnapshotLoadFailed(format!("string length {len} exceeds limit")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)
        .map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| Error::SnapshotLoadFailed(format!("invalid utf8: {e}")))
}

/// Writes a length-prefixed, CRC32-checked section: `u32 length, u32 crc32, body`.
pub fn write_section<W: Write>(w: &mut W, body: &[u8]) -> io::Result<()> {
    write_u32(w, body.len() as u32)?;
    write_u32(w, crc32(body))?;
    w.write_all(body)
}

/// Reads a length-prefixed, CRC32-checked section and verifies it, mapping a
/// checksum mismatch to `err_on_mismatch`.
pub fn read_section<R: Read>(r: &mut R, err_on_mismatch: IntegrityError) -> Result<Vec<u8>> {
    let len = read_u32(r).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    let expected_crc = read_u32(r).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body)
        .map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    if crc32(&body) != expected_crc {
        return Err(Error::SnapshotVerifyFailed(err_on_mismatch.message()));
    }
    Ok(body)
}
