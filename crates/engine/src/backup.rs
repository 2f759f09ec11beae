//! Backup cursors and incremental block manifests
//!
//! A `backup:` cursor pins a checkpoint at open and enumerates the durable
//! files a copy of the database needs. With `incremental=(enabled,...)` the
//! cursor also hashes each file in granularity-sized blocks and registers
//! the manifest under `this_id`; a later cursor naming that id as `src_id`
//! can then report, per file, the byte ranges that changed since.
//!
//! Only one backup cursor may be open per connection. Closing the cursor
//! releases the slot, so a dropped cursor releases it too.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use wiredtest_core::config::{self, check_keys, parse_config, ConfigMap};
use wiredtest_core::{Error, Key, Result, Value};
use xxhash_rust::xxh3::xxh3_64;

use crate::connection::ConnInner;
use crate::cursor::{Cursor, Modify};
use crate::layout::{home_path, is_runtime_file, table_for_file, LOG_FILE};

const DEFAULT_GRANULARITY: u64 = 16 << 20;

/// Block-hash manifest of one durable file at backup time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Block size the hashes were computed over
    pub granularity: u64,
    /// File length in bytes
    pub len: u64,
    /// xxh3 hash of each granularity-sized block, last block short
    pub blocks: Vec<u64>,
}

impl FileManifest {
    fn hash(data: &[u8], granularity: u64) -> FileManifest {
        let blocks = data
            .chunks(granularity as usize)
            .map(xxh3_64)
            .collect();
        FileManifest {
            granularity,
            len: data.len() as u64,
            blocks,
        }
    }
}

/// How a [`RangeEntry`] is to be copied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Copy the entire file; offset and length cover it whole.
    WholeFile,
    /// Copy `length` bytes starting at `offset`.
    Range,
}

/// One byte range an incremental backup must copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    /// Byte offset into the file
    pub offset: u64,
    /// Number of bytes to copy
    pub length: u64,
    /// Whole-file or in-place range copy
    pub kind: RangeKind,
}

#[derive(Debug)]
struct IncrementalOpts {
    granularity: u64,
    this_id: String,
    src_id: Option<String>,
}

impl IncrementalOpts {
    fn parse(map: &ConfigMap) -> Result<Option<IncrementalParse>> {
        let Some(item) = map.get("incremental") else {
            return Ok(None);
        };
        let nested = item.as_nested().ok_or_else(|| {
            Error::InvalidArgument(
                "incremental requires a (...) sub-configuration".to_string(),
            )
        })?;
        check_keys("session.open_cursor.incremental", config::INCREMENTAL, nested)?;

        if nested.get_bool("force_stop", false) {
            return Ok(Some(IncrementalParse::ForceStop));
        }
        if !nested.get_bool("enabled", false) {
            return Ok(None);
        }

        let granularity = match nested.get("granularity") {
            Some(item) => item.as_u64().ok_or_else(|| {
                Error::InvalidArgument("granularity requires a byte count".to_string())
            })?,
            None => DEFAULT_GRANULARITY,
        };
        if granularity == 0 {
            return Err(Error::InvalidArgument(
                "granularity must not be zero".to_string(),
            ));
        }
        let this_id = nested
            .get_str("this_id")
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "incremental backup requires this_id".to_string(),
                )
            })?
            .to_string();
        Ok(Some(IncrementalParse::Enabled(IncrementalOpts {
            granularity,
            this_id,
            src_id: nested.get_str("src_id").map(str::to_string),
        })))
    }
}

enum IncrementalParse {
    Enabled(IncrementalOpts),
    ForceStop,
}

/// A cursor over the `backup:` namespace
///
/// Keys are durable file names in lexical order; backup cursors carry no
/// values. [`BackupCursor::duplicate_ranges`] and
/// [`BackupCursor::duplicate_log`] stand in for the per-file and log-only
/// duplicate cursors of the backup protocol.
#[derive(Debug)]
pub struct BackupCursor {
    conn: Arc<ConnInner>,
    files: Vec<String>,
    // Manifests of this backup, present only in incremental mode.
    manifests: Option<BTreeMap<String, FileManifest>>,
    src_manifests: BTreeMap<String, FileManifest>,
    pos: Option<usize>,
    closed: bool,
}

impl BackupCursor {
    pub(crate) fn open(conn: Arc<ConnInner>, cfg: &str) -> Result<BackupCursor> {
        conn.ensure_open()?;
        let map = parse_config(cfg)?;
        check_keys("session.open_cursor", config::OPEN_CURSOR, &map)?;
        let incremental = IncrementalOpts::parse(&map)?;

        if conn.in_memory() {
            return Err(Error::InvalidArgument(
                "backup requires a durable database".to_string(),
            ));
        }
        conn.backup_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                Error::Busy("a backup cursor is already open".to_string())
            })?;

        match Self::build(Arc::clone(&conn), incremental) {
            Ok(cursor) => Ok(cursor),
            Err(e) => {
                conn.backup_active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn build(
        conn: Arc<ConnInner>,
        incremental: Option<IncrementalParse>,
    ) -> Result<BackupCursor> {
        let opts = match incremental {
            Some(IncrementalParse::ForceStop) => {
                conn.backups.lock().clear();
                conn.persist_meta()?;
                tracing::debug!(home = %conn.home().display(), "incremental backup state cleared");
                return Ok(BackupCursor {
                    conn,
                    files: Vec::new(),
                    manifests: None,
                    src_manifests: BTreeMap::new(),
                    pos: None,
                    closed: false,
                });
            }
            Some(IncrementalParse::Enabled(opts)) => Some(opts),
            None => None,
        };

        // Pin a checkpoint so the enumerated files are self-consistent.
        conn.checkpoint(false)?;

        let mut files = Vec::new();
        for entry in fs::read_dir(conn.home())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_runtime_file(&name) {
                files.push(name);
            }
        }
        files.sort();

        let (manifests, src_manifests) = match opts {
            Some(opts) => {
                let src_manifests = match &opts.src_id {
                    Some(src_id) => conn
                        .backups
                        .lock()
                        .get(src_id)
                        .cloned()
                        .ok_or_else(|| {
                            Error::InvalidArgument(format!(
                                "unknown incremental backup source id: {}",
                                src_id
                            ))
                        })?,
                    None => BTreeMap::new(),
                };
                let mut manifests = BTreeMap::new();
                for name in &files {
                    let data = fs::read(home_path(conn.home(), name))?;
                    manifests.insert(name.clone(), FileManifest::hash(&data, opts.granularity));
                }
                conn.backups
                    .lock()
                    .insert(opts.this_id.clone(), manifests.clone());
                conn.persist_meta()?;
                tracing::debug!(id = %opts.this_id, files = files.len(), "incremental backup registered");
                (Some(manifests), src_manifests)
            }
            None => (None, BTreeMap::new()),
        };

        Ok(BackupCursor {
            conn,
            files,
            manifests,
            src_manifests,
            pos: None,
            closed: false,
        })
    }

    fn ensure_live(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidArgument(
                "backup cursor is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// The byte ranges of `file` an incremental copy must transfer.
    ///
    /// A file absent from the source backup, or one the block diff cannot
    /// patch in place, comes back as a single `WholeFile` entry. An
    /// unchanged file comes back empty.
    ///
    /// # Errors
    /// `InvalidArgument` unless the cursor was opened incremental, or when
    /// `file` is not among the enumerated files.
    pub fn duplicate_ranges(&self, file: &str) -> Result<Vec<RangeEntry>> {
        self.ensure_live()?;
        let manifests = self.manifests.as_ref().ok_or_else(|| {
            Error::InvalidArgument(
                "file ranges require an incremental backup cursor".to_string(),
            )
        })?;
        let cur = manifests.get(file).ok_or_else(|| {
            Error::InvalidArgument(format!("{} is not part of this backup", file))
        })?;

        let whole = |len: u64| {
            vec![RangeEntry {
                offset: 0,
                length: len,
                kind: RangeKind::WholeFile,
            }]
        };
        // Metadata and log files are always copied whole.
        if table_for_file(file).is_none() {
            return Ok(whole(cur.len));
        }
        let Some(src) = self.src_manifests.get(file) else {
            return Ok(whole(cur.len));
        };
        // A shrunken file or a granularity change cannot be patched in place.
        if src.granularity != cur.granularity || cur.len < src.len {
            return Ok(whole(cur.len));
        }

        let mut ranges = Vec::new();
        for (i, block) in cur.blocks.iter().enumerate() {
            if src.blocks.get(i) == Some(block) {
                continue;
            }
            let offset = i as u64 * cur.granularity;
            ranges.push(RangeEntry {
                offset,
                length: cur.granularity.min(cur.len - offset),
                kind: RangeKind::Range,
            });
        }
        Ok(ranges)
    }

    /// The log files a log-only duplicate of this cursor would enumerate.
    pub fn duplicate_log(&self) -> Result<Vec<String>> {
        self.ensure_live()?;
        if self.conn.log_enabled() {
            Ok(vec![LOG_FILE.to_string()])
        } else {
            Ok(Vec::new())
        }
    }
}

impl Cursor for BackupCursor {
    fn set_key(&mut self, _key: Key) {}

    fn set_value(&mut self, _value: Value) {}

    fn get_key(&self) -> Result<Key> {
        self.ensure_live()?;
        match self.pos {
            Some(i) if i < self.files.len() => Ok(Key::Str(self.files[i].clone())),
            _ => Err(Error::InvalidArgument(
                "backup cursor is not positioned".to_string(),
            )),
        }
    }

    fn get_value(&self) -> Result<Value> {
        Err(Error::InvalidArgument(
            "backup cursors have no value".to_string(),
        ))
    }

    fn search(&mut self) -> Result<bool> {
        Err(Error::InvalidArgument(
            "backup cursors do not support search".to_string(),
        ))
    }

    fn insert(&mut self) -> Result<()> {
        Err(Error::InvalidArgument(
            "backup cursors are read-only".to_string(),
        ))
    }

    fn update(&mut self) -> Result<()> {
        Err(Error::InvalidArgument(
            "backup cursors are read-only".to_string(),
        ))
    }

    fn remove(&mut self) -> Result<()> {
        Err(Error::InvalidArgument(
            "backup cursors are read-only".to_string(),
        ))
    }

    fn modify(&mut self, _mods: &[Modify]) -> Result<()> {
        Err(Error::InvalidArgument(
            "backup cursors are read-only".to_string(),
        ))
    }

    fn next(&mut self) -> Result<bool> {
        self.ensure_live()?;
        let next = match self.pos {
            None => 0,
            Some(i) => i + 1,
        };
        if next < self.files.len() {
            self.pos = Some(next);
            Ok(true)
        } else {
            self.pos = None;
            Ok(false)
        }
    }

    fn prev(&mut self) -> Result<bool> {
        self.ensure_live()?;
        let prev = match self.pos {
            None => self.files.len().checked_sub(1),
            Some(0) => None,
            Some(i) => Some(i - 1),
        };
        match prev {
            Some(i) => {
                self.pos = Some(i);
                Ok(true)
            }
            None => {
                self.pos = None;
                Ok(false)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.pos = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.conn.backup_active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn uri(&self) -> &str {
        "backup:"
    }
}

impl Drop for BackupCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
