//! Binary snapshot persistence: Version 1 codec for `DUMP SAVE`/`DUMP LOAD`
//! (§4.12).

pub mod codec;
pub mod format;

pub use codec::{LoadedSnapshot, SnapshotStats};
pub use format::SnapshotInfo;
