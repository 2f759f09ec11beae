//! Durable metadata and checkpoint snapshot files
//!
//! The metadata file carries the table catalog, the checkpoint LSN, the
//! global timestamps at checkpoint time, and any incremental backup
//! manifests. Each table's checkpoint lands in its own `<table>.wt` file.
//!
//! Both file kinds share one framing:
//!
//! ```text
//! [crc32: u32 LE][payload: bincode]
//! ```
//!
//! and both are written to a `.wttmp` staging file first, synced, then
//! renamed over the target. A crash mid-checkpoint leaves the previous
//! file intact plus an orphaned staging file that recovery ignores.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use wiredtest_core::{Error, Result, Timestamp};

use crate::backup::FileManifest;
use crate::layout::{home_path, META_FILE, TMP_SUFFIX};
use crate::store::SnapshotRow;

/// Catalog entry for one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    /// Table name without the `table:` prefix
    pub name: String,
    /// Key format code
    pub key_format: String,
    /// Value format code
    pub value_format: String,
    /// Whether updates are logged
    pub logged: bool,
    /// The configuration string the table was created with
    pub create_config: String,
}

/// One incremental backup identifier and its per-file manifests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMeta {
    /// Identifier supplied at `this_id`
    pub id: String,
    /// Block-hash manifest per durable file
    pub files: Vec<(String, FileManifest)>,
}

/// Everything the metadata file persists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    /// Table catalog
    pub tables: Vec<TableMeta>,
    /// Highest LSN covered by the table snapshots
    pub checkpoint_lsn: u64,
    /// Oldest timestamp at checkpoint time
    pub oldest: Timestamp,
    /// Stable timestamp at checkpoint time
    pub stable: Timestamp,
    /// Registered incremental backup identifiers
    pub backups: Vec<BackupMeta>,
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

fn write_framed(path: &Path, payload: &[u8]) -> Result<()> {
    let tmp = staging_path(path);
    {
        let mut file = File::create(&tmp)?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        file.write_all(&hasher.finalize().to_le_bytes())?;
        file.write_all(payload)?;
        file.sync_data()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_framed(path: &Path) -> Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if data.len() < 4 {
        return Err(Error::Corruption(format!(
            "{}: truncated header",
            path.display()
        )));
    }
    let crc = u32::from_le_bytes(data[..4].try_into().unwrap());
    let payload = &data[4..];
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != crc {
        return Err(Error::Corruption(format!(
            "{}: checksum mismatch",
            path.display()
        )));
    }
    Ok(Some(payload.to_vec()))
}

/// Write the metadata file for `home`.
pub fn write_meta(home: &Path, meta: &Meta) -> Result<()> {
    let payload = bincode::serialize(meta)?;
    write_framed(&home_path(home, META_FILE), &payload)
}

/// Read the metadata file for `home`, `None` when the database is new.
pub fn read_meta(home: &Path) -> Result<Option<Meta>> {
    match read_framed(&home_path(home, META_FILE))? {
        Some(payload) => Ok(Some(bincode::deserialize(&payload)?)),
        None => Ok(None),
    }
}

/// Write one table's checkpoint snapshot.
pub fn write_snapshot(path: &Path, rows: &[SnapshotRow]) -> Result<()> {
    let payload = bincode::serialize(rows)?;
    write_framed(path, &payload)
}

/// Read one table's checkpoint snapshot; missing file means empty.
pub fn read_snapshot(path: &Path) -> Result<Vec<SnapshotRow>> {
    match read_framed(path)? {
        Some(payload) => Ok(bincode::deserialize(&payload)?),
        None => Ok(Vec::new()),
    }
}
