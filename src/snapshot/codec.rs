//! Version 1 snapshot codec: atomic write, CRC-verified read (§4.12).
//!
//! File layout (all multi-byte integers little-endian):
//! ```text
//! [fixed header]  4 bytes magic "NVEC" || 4 bytes version
//! [v1 header]     header_size, flags, timestamp, total_file_size, file_crc32, reserved
//! [config]        length-prefixed, CRC32-checked bincode body
//! [stats]         optional, length-prefixed, CRC32-checked bincode body
//! [stores]        store_count = 3, then per store: name, length-prefixed CRC32-checked body
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::co_occurrence::CoOccurrenceStatistics;
use crate::events::event_store::{EventStoreStatistics, StoredEvent};
use crate::events::{CoOccurrenceIndex, EventStore};
use crate::snapshot::format::*;
use crate::vectors::vector_store::{Vector, VectorStoreStatistics};
use crate::vectors::VectorStore;

/// Aggregate statistics persisted in the optional stats section. Kept
/// separate from the live `Statistics` structs so the wire format doesn't
/// change shape every time an unrelated counter is added to a store.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SnapshotStats {
    pub event_store: EventStoreStatsWire,
    pub co_occurrence: CoOccurrenceStatsWire,
    pub vector_store: VectorStoreStatsWire,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EventStoreStatsWire {
    pub total_events: u64,
    pub deduped_events: u64,
    pub stored_events: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CoOccurrenceStatsWire {
    pub tracked_ids: u64,
    pub co_pairs: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct VectorStoreStatsWire {
    pub vector_count: u64,
    pub dimension: u64,
}

impl From<EventStoreStatistics> for EventStoreStatsWire {
    fn from(s: EventStoreStatistics) -> Self {
        Self {
            total_events: s.total_events,
            deduped_events: s.deduped_events,
            stored_events: s.stored_events,
        }
    }
}

impl From<CoOccurrenceStatistics> for CoOccurrenceStatsWire {
    fn from(s: CoOccurrenceStatistics) -> Self {
        Self {
            tracked_ids: s.tracked_ids,
            co_pairs: s.co_pairs,
        }
    }
}

impl From<VectorStoreStatistics> for VectorStoreStatsWire {
    fn from(s: VectorStoreStatistics) -> Self {
        Self {
            vector_count: s.vector_count,
            dimension: s.dimension,
        }
    }
}

/// Everything a `DUMP LOAD` needs to repopulate the live stores.
pub struct LoadedSnapshot {
    pub config: Config,
    pub stats: Option<SnapshotStats>,
    pub events: Vec<(String, Vec<StoredEvent>)>,
    pub event_stats: EventStoreStatistics,
    pub co_rows: Vec<(String, Vec<(String, f32)>)>,
    pub vector_dimension: usize,
    pub vectors: Vec<(String, Vector)>,
}

/// Resolves a user-supplied snapshot path relative to the configured
/// `snapshot.dir`, rejecting any path that escapes that root.
pub fn resolve_path(snapshot_dir: &str, requested: &str) -> Result<PathBuf> {
    let root = Path::new(snapshot_dir);
    fs::create_dir_all(root).map_err(|e| {
        Error::SnapshotSaveFailed(format!("could not create snapshot dir {snapshot_dir}: {e}"))
    })?;
    let root_canon = fs::canonicalize(root)
        .map_err(|e| Error::SnapshotSaveFailed(format!("invalid snapshot dir {snapshot_dir}: {e}")))?;

    let candidate = root.join(requested);
    // The target file need not exist yet; canonicalize its parent instead
    // and re-append the file name so a not-yet-written file still gets
    // checked for directory traversal.
    let parent = candidate.parent().unwrap_or(root);
    fs::create_dir_all(parent)
        .map_err(|e| Error::SnapshotSaveFailed(format!("could not create directory {}: {e}", parent.display())))?;
    let parent_canon = fs::canonicalize(parent)
        .map_err(|e| Error::SnapshotSaveFailed(format!("invalid path {requested}: {e}")))?;
    if !parent_canon.starts_with(&root_canon) {
        return Err(Error::SnapshotSaveFailed(format!(
            "path {requested} escapes snapshot.dir"
        )));
    }
    let file_name = candidate
        .file_name()
        .ok_or_else(|| Error::SnapshotSaveFailed(format!("invalid snapshot path {requested}")))?;
    Ok(parent_canon.join(file_name))
}

fn serialize_event_store(contexts: &[(String, Vec<StoredEvent>)]) -> Vec<u8> {
    let mut body = Vec::new();
    write_u32(&mut body, contexts.len() as u32).unwrap();
    for (ctx, events) in contexts {
        write_string(&mut body, ctx).unwrap();
        write_u32(&mut body, events.len() as u32).unwrap();
        for event in events {
            write_string(&mut body, &event.item_id).unwrap();
            write_u64(&mut body, event.score as u64).unwrap();
            write_u64(&mut body, event.timestamp).unwrap();
        }
    }
    body
}

fn deserialize_event_store(body: &[u8]) -> Result<Vec<(String, Vec<StoredEvent>)>> {
    let mut cursor = Cursor::new(body);
    let ctx_count = read_u32(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    let mut contexts = Vec::with_capacity(ctx_count as usize);
    for _ in 0..ctx_count {
        let ctx = read_string(&mut cursor)?;
        let event_count = read_u32(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
        let mut events = Vec::with_capacity(event_count as usize);
        for _ in 0..event_count {
            let item_id = read_string(&mut cursor)?;
            let score = read_u64(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))? as i64;
            let timestamp = read_u64(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
            events.push(StoredEvent { item_id, score, timestamp });
        }
        contexts.push((ctx, events));
    }
    Ok(contexts)
}

fn serialize_co_occurrence(rows: &[(String, Vec<(String, f32)>)]) -> Vec<u8> {
    let mut body = Vec::new();
    write_u32(&mut body, rows.len() as u32).unwrap();
    for (id, neighbors) in rows {
        write_string(&mut body, id).unwrap();
        write_u32(&mut body, neighbors.len() as u32).unwrap();
        for (neighbor, score) in neighbors {
            write_string(&mut body, neighbor).unwrap();
            body.write_all(&score.to_le_bytes()).unwrap();
        }
    }
    body
}

fn deserialize_co_occurrence(body: &[u8]) -> Result<Vec<(String, Vec<(String, f32)>)>> {
    let mut cursor = Cursor::new(body);
    let row_count = read_u32(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let id = read_string(&mut cursor)?;
        let neighbor_count = read_u32(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
        let mut neighbors = Vec::with_capacity(neighbor_count as usize);
        for _ in 0..neighbor_count {
            let neighbor = read_string(&mut cursor)?;
            let mut buf = [0u8; 4];
            cursor
                .read_exact(&mut buf)
                .map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
            neighbors.push((neighbor, f32::from_le_bytes(buf)));
        }
        rows.push((id, neighbors));
    }
    Ok(rows)
}

fn serialize_vector_store(dimension: usize, vectors: &[(String, Vector)]) -> Vec<u8> {
    let mut body = Vec::new();
    write_u32(&mut body, dimension as u32).unwrap();
    write_u32(&mut body, vectors.len() as u32).unwrap();
    for (id, vector) in vectors {
        write_string(&mut body, id).unwrap();
        body.push(vector.normalized as u8);
        write_u32(&mut body, vector.data.len() as u32).unwrap();
        for v in &vector.data {
            body.write_all(&v.to_le_bytes()).unwrap();
        }
    }
    body
}

fn deserialize_vector_store(body: &[u8]) -> Result<(usize, Vec<(String, Vector)>)> {
    let mut cursor = Cursor::new(body);
    let dimension = read_u32(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))? as usize;
    let count = read_u32(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    let mut vectors = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = read_string(&mut cursor)?;
        let mut flag = [0u8; 1];
        cursor
            .read_exact(&mut flag)
            .map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
        let normalized = flag[0] != 0;
        let len = read_u32(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
        let mut data = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let mut buf = [0u8; 4];
            cursor
                .read_exact(&mut buf)
                .map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
            data.push(f32::from_le_bytes(buf));
        }
        vectors.push((id, Vector { data, normalized }));
    }
    Ok((dimension, vectors))
}

/// Writes a full snapshot of `config`, `stats`, and the three core stores to
/// `path`, atomically (§4.12 write algorithm).
pub fn write(
    path: &Path,
    config: &Config,
    stats: Option<&SnapshotStats>,
    event_store: &EventStore,
    co_index: &CoOccurrenceIndex,
    vector_store: &VectorStore,
) -> Result<()> {
    let (events, event_stats) = event_store.export_contexts();
    let co_rows = co_index.export_rows();
    let (dimension, vectors) = {
        let all = vector_store.get_all();
        (vector_store.get_dimension(), all)
    };
    let _ = event_stats;

    let tmp_path = path.with_extension("tmp");
    let write_result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(&MAGIC)?;
        write_u32(&mut file, VERSION)?;

        let header_size: u32 = 4 + 4 + 8 + 8 + 4 + 4; // flags,timestamp,total_size,crc,reserved_len(=0)
        let flags = if stats.is_some() { FLAG_WITH_STATISTICS } else { 0 };
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let header_placeholder_offset = file.stream_position()?;
        write_u32(&mut file, header_size)?;
        write_u32(&mut file, flags)?;
        write_u64(&mut file, timestamp)?;
        write_u64(&mut file, 0)?; // total_file_size placeholder
        write_u32(&mut file, 0)?; // file_crc32 placeholder
        write_u32(&mut file, 0)?; // reserved length = 0

        let config_body = bincode::serialize(config)
            .map_err(|e| Error::SnapshotSaveFailed(format!("config serialize failed: {e}")))?;
        write_section(&mut file, &config_body)?;

        if let Some(stats) = stats {
            let stats_body = bincode::serialize(stats)
                .map_err(|e| Error::SnapshotSaveFailed(format!("stats serialize failed: {e}")))?;
            write_section(&mut file, &stats_body)?;
        }

        write_u32(&mut file, STORE_COUNT)?;

        write_string(&mut file, STORE_NAME_EVENTS)?;
        write_section(&mut file, &serialize_event_store(&events))?;

        write_string(&mut file, STORE_NAME_CO_OCCURRENCE)?;
        write_section(&mut file, &serialize_co_occurrence(&co_rows))?;

        write_string(&mut file, STORE_NAME_VECTORS)?;
        write_section(&mut file, &serialize_vector_store(dimension, &vectors))?;

        let total_file_size = file.stream_position()?;
        let total_size_offset = header_placeholder_offset + 4 /*header_size*/ + 4 /*flags*/ + 8 /*timestamp*/;
        let crc_offset = total_size_offset + 8 /*total_file_size*/;
        file.seek(SeekFrom::Start(total_size_offset))?;
        write_u64(&mut file, total_file_size)?;

        // Compute file CRC32 over the whole file with the crc field zeroed.
        file.seek(SeekFrom::Start(0))?;
        let mut whole = Vec::with_capacity(total_file_size as usize);
        file.read_to_end(&mut whole)?;
        let crc_field = crc_offset as usize..crc_offset as usize + 4;
        whole[crc_field.clone()].copy_from_slice(&[0, 0, 0, 0]);
        let file_crc = crc32(&whole);

        file.seek(SeekFrom::Start(crc_offset))?;
        write_u32(&mut file, file_crc)?;
        file.sync_all()?;
        Ok(())
    })();

    match write_result {
        Ok(()) => {
            fs::rename(&tmp_path, path)
                .map_err(|e| Error::SnapshotSaveFailed(format!("atomic rename failed: {e}")))?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(match e {
                Error::SnapshotSaveFailed(_) => e,
                other => Error::SnapshotSaveFailed(other.to_string()),
            })
        }
    }
}

fn read_and_verify_header(file: &mut File) -> Result<(HeaderV1, Vec<u8>)> {
    let mut whole = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut whole)?;

    if whole.len() < 8 {
        return Err(Error::SnapshotLoadFailed("file too short for fixed header".to_string()));
    }
    if whole[0..4] != MAGIC {
        return Err(Error::SnapshotLoadFailed("bad magic".to_string()));
    }
    let version = u32::from_le_bytes(whole[4..8].try_into().unwrap());
    if !(MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&version) {
        return Err(Error::SnapshotLoadFailed(format!("unsupported snapshot version {version}")));
    }

    let mut cursor = Cursor::new(&whole[8..]);
    let header_size = read_u32(&mut cursor)?;
    let flags = read_u32(&mut cursor)?;
    let timestamp = read_u64(&mut cursor)?;
    let total_file_size = read_u64(&mut cursor)?;
    let file_crc32 = read_u32(&mut cursor)?;
    let reserved_len = read_u32(&mut cursor)?;
    let mut reserved = vec![0u8; reserved_len as usize];
    cursor.read_exact(&mut reserved)?;

    if total_file_size != whole.len() as u64 {
        return Err(Error::SnapshotVerifyFailed(format!(
            "file size mismatch: header says {total_file_size}, actual {}",
            whole.len()
        )));
    }

    let crc_offset = 8 + 4 + 4 + 8 + 8;
    let mut for_crc = whole.clone();
    for_crc[crc_offset..crc_offset + 4].copy_from_slice(&[0, 0, 0, 0]);
    if crc32(&for_crc) != file_crc32 {
        return Err(Error::SnapshotVerifyFailed(IntegrityError::FileCrc.message()));
    }

    Ok((
        HeaderV1 {
            header_size,
            flags,
            snapshot_timestamp: timestamp,
            total_file_size,
            file_crc32,
            reserved,
        },
        whole,
    ))
}

/// Performs steps 1–3 of the read algorithm without loading store data.
pub fn verify(path: &Path) -> Result<()> {
    let mut file = File::open(path).map_err(|e| Error::SnapshotVerifyFailed(e.to_string()))?;
    read_and_verify_header(&mut file)?;
    Ok(())
}

/// Reads only the headers, returning summary info without loading stores.
pub fn get_info(path: &Path) -> Result<SnapshotInfo> {
    let mut file = File::open(path).map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;
    let mut magic_version = [0u8; 8];
    file.read_exact(&mut magic_version)
        .map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;
    if magic_version[0..4] != MAGIC {
        return Err(Error::SnapshotInfoFailed("bad magic".to_string()));
    }
    let version = u32::from_le_bytes(magic_version[4..8].try_into().unwrap());

    let _header_size = read_u32(&mut file).map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;
    let flags = read_u32(&mut file).map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;
    let timestamp = read_u64(&mut file).map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;
    let total_file_size = read_u64(&mut file).map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;
    let _file_crc32 = read_u32(&mut file).map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;
    let reserved_len = read_u32(&mut file).map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;
    let mut reserved = vec![0u8; reserved_len as usize];
    file.read_exact(&mut reserved)
        .map_err(|e| Error::SnapshotInfoFailed(e.to_string()))?;

    Ok(SnapshotInfo {
        version,
        store_count: STORE_COUNT,
        flags,
        file_size: total_file_size,
        timestamp,
        has_statistics: flags & FLAG_WITH_STATISTICS != 0,
    })
}

/// Full read: validates the header, then every section, and deserializes
/// store data (§4.12 read algorithm).
pub fn read(path: &Path) -> Result<LoadedSnapshot> {
    let mut file = File::open(path).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    let (header, whole) = read_and_verify_header(&mut file)?;

    let mut cursor = Cursor::new(&whole[8 + header.header_size as usize..]);

    let config_body = read_section(&mut cursor, IntegrityError::ConfigCrc)?;
    let config: Config = bincode::deserialize(&config_body)
        .map_err(|e| Error::SnapshotLoadFailed(format!("config deserialize failed: {e}")))?;

    let stats = if header.flags & FLAG_WITH_STATISTICS != 0 {
        let stats_body = read_section(&mut cursor, IntegrityError::StatsCrc)?;
        Some(
            bincode::deserialize::<SnapshotStats>(&stats_body)
                .map_err(|e| Error::SnapshotLoadFailed(format!("stats deserialize failed: {e}")))?,
        )
    } else {
        None
    };

    let store_count = read_u32(&mut cursor).map_err(|e| Error::SnapshotLoadFailed(e.to_string()))?;
    let mut events = Vec::new();
    let mut co_rows = Vec::new();
    let mut vector_dimension = 0usize;
    let mut vectors = Vec::new();

    for _ in 0..store_count {
        let name = read_string(&mut cursor)?;
        let integrity_err = match name.as_str() {
            STORE_NAME_EVENTS => IntegrityError::EventStoreCrc,
            STORE_NAME_CO_OCCURRENCE => IntegrityError::CoOccurrenceCrc,
            STORE_NAME_VECTORS => IntegrityError::VectorStoreCrc,
            other => {
                return Err(Error::SnapshotLoadFailed(format!("unknown store section: {other}")));
            }
        };
        let body = read_section(&mut cursor, integrity_err)?;
        match name.as_str() {
            STORE_NAME_EVENTS => events = deserialize_event_store(&body)?,
            STORE_NAME_CO_OCCURRENCE => co_rows = deserialize_co_occurrence(&body)?,
            STORE_NAME_VECTORS => {
                let (dim, vecs) = deserialize_vector_store(&body)?;
                vector_dimension = dim;
                vectors = vecs;
            }
            _ => unreachable!(),
        }
    }

    let event_stats = stats
        .as_ref()
        .map(|s| EventStoreStatistics {
            active_contexts: events.len() as u64,
            total_events: s.event_store.total_events,
            deduped_events: s.event_store.deduped_events,
            stored_events: s.event_store.stored_events,
            memory_bytes: 0,
        })
        .unwrap_or_default();

    Ok(LoadedSnapshot {
        config,
        stats,
        events,
        event_stats,
        co_rows,
        vector_dimension,
        vectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populated() -> (EventStore, CoOccurrenceIndex, VectorStore) {
        let event_store = EventStore::new(16, 16, 60);
        event_store.add_event("ctx", "a", 3).unwrap();
        event_store.add_event("ctx", "b", 4).unwrap();
        let co_index = CoOccurrenceIndex::new();
        co_index.update_from_events(&event_store.get_events("ctx"));
        let vector_store = VectorStore::new();
        vector_store.set_vector("a", &[1.0, 0.0], false).unwrap();
        vector_store.set_vector("b", &[0.0, 1.0], false).unwrap();
        (event_store, co_index, vector_store)
    }

    #[test]
    fn snap1_round_trip_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.dmp");
        let (event_store, co_index, vector_store) = populated();
        let config = Config::default();

        write(&path, &config, None, &event_store, &co_index, &vector_store).unwrap();
        let loaded = read(&path).unwrap();

        assert_eq!(loaded.vectors.len(), 2);
        assert_eq!(loaded.vector_dimension, 2);
        assert_eq!(loaded.co_rows.len(), 2);
        assert_eq!(loaded.events.len(), 1);
        assert_eq!(loaded.events[0].1.len(), 2);
    }

    #[test]
    fn snap3_single_byte_flip_detected_by_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.dmp");
        let (event_store, co_index, vector_store) = populated();
        write(&path, &Config::default(), None, &event_store, &co_index, &vector_store).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(verify(&path).is_err());
    }

    #[test]
    fn write_is_atomic_no_tmp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.dmp");
        let (event_store, co_index, vector_store) = populated();
        write(&path, &Config::default(), None, &event_store, &co_index, &vector_store).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn get_info_reads_headers_without_loading_stores() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.dmp");
        let (event_store, co_index, vector_store) = populated();
        let stats = SnapshotStats::default();
        write(&path, &Config::default(), Some(&stats), &event_store, &co_index, &vector_store).unwrap();

        let info = get_info(&path).unwrap();
        assert_eq!(info.version, VERSION);
        assert_eq!(info.store_count, 3);
        assert!(info.has_statistics);
    }

    #[test]
    fn path_resolution_rejects_traversal() {
        let dir = tempdir().unwrap();
        let snapshot_dir = dir.path().join("snapshots");
        fs::create_dir_all(&snapshot_dir).unwrap();
        let err = resolve_path(snapshot_dir.to_str().unwrap(), "../../etc/passwd");
        assert!(err.is_err());
    }

    #[test]
    fn path_resolution_accepts_plain_filename() {
        let dir = tempdir().unwrap();
        let snapshot_dir = dir.path().join("snapshots");
        let resolved = resolve_path(snapshot_dir.to_str().unwrap(), "x.dmp").unwrap();
        assert_eq!(resolved.file_name().unwrap(), "x.dmp");
    }
}
