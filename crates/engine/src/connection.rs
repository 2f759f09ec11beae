//! Connection lifecycle and global timestamp state
//!
//! A connection owns one home directory: the advisory lock, the table
//! catalog, the write-ahead log, and the global timestamps (oldest, stable,
//! all_durable, last_checkpoint, recovery). Opening an existing home runs
//! recovery: table snapshots are installed, then log records past the
//! checkpoint LSN are replayed.

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use wiredtest_core::config::{self, check_keys, parse_config, ConfigMap};
use wiredtest_core::{Error, FormatType, Result, Timestamp};

use crate::backup::FileManifest;
use crate::checkpoint::{self, BackupMeta, Meta, TableMeta};
use crate::layout::{home_path, table_file, LOCK_FILE, LOG_FILE};
use crate::log::{read_log, LogOp, LogRecord, LogWriter};
use crate::session::Session;
use crate::stats::Stats;
use crate::store::Table;

const DEFAULT_CACHE_SIZE: u64 = 100 << 20;
const MIN_CACHE_SIZE: u64 = 1 << 20;

/// Parse a timestamp value from a configuration map, rejecting zero.
pub(crate) fn config_ts(map: &ConfigMap, key: &str) -> Result<Option<Timestamp>> {
    let Some(item) = map.get(key) else {
        return Ok(None);
    };
    let s = item.as_str().ok_or_else(|| {
        Error::InvalidArgument(format!("{} requires a timestamp value", key))
    })?;
    let ts = Timestamp::from_hex(s)?;
    if !ts.is_set() {
        return Err(Error::InvalidArgument(format!(
            "zero is not a valid {} value",
            key
        )));
    }
    Ok(Some(ts))
}

/// Options fixed at `Connection::open`
#[derive(Debug, Clone)]
pub(crate) struct ConnOptions {
    pub(crate) create: bool,
    pub(crate) cache_size: u64,
    pub(crate) log_enabled: bool,
    pub(crate) in_memory: bool,
    pub(crate) statistics: bool,
    pub(crate) error_prefix: Option<String>,
}

impl ConnOptions {
    fn parse(config: &str) -> Result<Self> {
        let map = parse_config(config)?;
        check_keys("connection.open", config::CONNECTION_OPEN, &map)?;

        let log_enabled = match map.get("log") {
            Some(item) => {
                let nested = item.as_nested().ok_or_else(|| {
                    Error::InvalidArgument(
                        "log requires a (...) sub-configuration".to_string(),
                    )
                })?;
                check_keys("connection.open.log", config::LOG_SUBCONFIG, nested)?;
                nested.get_bool("enabled", false)
            }
            None => false,
        };

        let cache_size = match map.get("cache_size") {
            Some(item) => item.as_u64().ok_or_else(|| {
                Error::InvalidArgument("cache_size requires a byte count".to_string())
            })?,
            None => DEFAULT_CACHE_SIZE,
        };
        if cache_size < MIN_CACHE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "cache_size {} is below the {} byte minimum",
                cache_size, MIN_CACHE_SIZE
            )));
        }

        Ok(ConnOptions {
            create: map.get_bool("create", false),
            cache_size,
            log_enabled,
            in_memory: map.get_bool("in_memory", false),
            statistics: map.get_bool("statistics", true),
            error_prefix: map.get_str("error_prefix").map(str::to_string),
        })
    }
}

/// Global timestamps managed by `set_timestamp` and commit processing
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GlobalTimestamps {
    pub(crate) oldest: Timestamp,
    pub(crate) stable: Timestamp,
    pub(crate) all_durable: Timestamp,
    pub(crate) last_checkpoint: Timestamp,
    pub(crate) recovery: Timestamp,
}

/// Shared connection state behind `Connection` and every `Session`
pub(crate) struct ConnInner {
    home: PathBuf,
    opts: ConnOptions,
    lock: Mutex<Option<File>>,
    pub(crate) tables: RwLock<BTreeMap<String, Arc<Table>>>,
    pub(crate) global: Mutex<GlobalTimestamps>,
    pub(crate) commit_seq: AtomicU64,
    next_txn_id: AtomicU64,
    next_session_id: AtomicU64,
    pub(crate) active_txns: AtomicUsize,
    active_reads: Mutex<BTreeMap<u64, Timestamp>>,
    log: Mutex<Option<LogWriter>>,
    next_lsn: AtomicU64,
    checkpoint_lsn: AtomicU64,
    pub(crate) backup_active: AtomicBool,
    pub(crate) backups: Mutex<BTreeMap<String, BTreeMap<String, FileManifest>>>,
    pub(crate) stats: Stats,
    closed: AtomicBool,
}

impl ConnInner {
    fn fresh(home: PathBuf, opts: ConnOptions, lock: Option<File>) -> ConnInner {
        ConnInner {
            home,
            opts,
            lock: Mutex::new(lock),
            tables: RwLock::new(BTreeMap::new()),
            global: Mutex::new(GlobalTimestamps::default()),
            commit_seq: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(0),
            next_session_id: AtomicU64::new(0),
            active_txns: AtomicUsize::new(0),
            active_reads: Mutex::new(BTreeMap::new()),
            log: Mutex::new(None),
            next_lsn: AtomicU64::new(1),
            checkpoint_lsn: AtomicU64::new(0),
            backup_active: AtomicBool::new(false),
            backups: Mutex::new(BTreeMap::new()),
            stats: Stats::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn recover(home: PathBuf, opts: ConnOptions, lock: File, meta: Meta) -> Result<ConnInner> {
        let mut tables = BTreeMap::new();
        for tm in &meta.tables {
            let key_format = FormatType::parse(&tm.key_format)?;
            let value_format = FormatType::parse(&tm.value_format)?;
            let table = Arc::new(Table::new(
                &tm.name,
                key_format,
                value_format,
                tm.logged,
                &tm.create_config,
            ));
            let rows = checkpoint::read_snapshot(&home_path(&home, &table_file(&tm.name)))?;
            table.install_snapshot(rows);
            tables.insert(tm.name.clone(), table);
        }

        let records = read_log(&home_path(&home, LOG_FILE))?;
        let mut last_lsn = meta.checkpoint_lsn;
        let mut replayed = 0u64;
        let mut max_durable = Timestamp::NONE;
        for record in &records {
            last_lsn = last_lsn.max(record.lsn);
            if record.lsn <= meta.checkpoint_lsn {
                continue;
            }
            for op in &record.ops {
                let Some(table) = tables.get(op.table()) else {
                    continue;
                };
                match op {
                    LogOp::Put { key, value, .. } => table.apply_logged(
                        key.clone(),
                        Some(value.clone()),
                        record.commit_ts,
                        record.durable_ts,
                    ),
                    LogOp::Remove { key, .. } => {
                        table.apply_logged(key.clone(), None, record.commit_ts, record.durable_ts)
                    }
                }
            }
            max_durable = max_durable.max(record.durable_ts);
            replayed += 1;
        }

        let global = GlobalTimestamps {
            oldest: meta.oldest,
            stable: meta.stable,
            all_durable: max_durable,
            last_checkpoint: meta.stable,
            recovery: meta.stable,
        };
        let backups = meta
            .backups
            .iter()
            .map(|b| (b.id.clone(), b.files.iter().cloned().collect()))
            .collect();

        let inner = ConnInner {
            home,
            opts,
            lock: Mutex::new(Some(lock)),
            tables: RwLock::new(tables),
            global: Mutex::new(global),
            commit_seq: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(0),
            next_session_id: AtomicU64::new(0),
            active_txns: AtomicUsize::new(0),
            active_reads: Mutex::new(BTreeMap::new()),
            log: Mutex::new(None),
            next_lsn: AtomicU64::new(last_lsn + 1),
            checkpoint_lsn: AtomicU64::new(meta.checkpoint_lsn),
            backup_active: AtomicBool::new(false),
            backups: Mutex::new(backups),
            stats: Stats::new(),
            closed: AtomicBool::new(false),
        };
        Stats::add(&inner.stats.recovery_records, replayed);
        tracing::debug!(replayed, checkpoint_lsn = meta.checkpoint_lsn, "recovery complete");
        Ok(inner)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidArgument("connection is closed".to_string()));
        }
        Ok(())
    }

    pub(crate) fn home(&self) -> &Path {
        &self.home
    }

    pub(crate) fn in_memory(&self) -> bool {
        self.opts.in_memory
    }

    pub(crate) fn statistics_configured(&self) -> bool {
        self.opts.statistics
    }

    pub(crate) fn cache_size(&self) -> u64 {
        self.opts.cache_size
    }

    pub(crate) fn log_enabled(&self) -> bool {
        self.opts.log_enabled && !self.opts.in_memory
    }

    pub(crate) fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("table:{} does not exist", name)))
    }

    pub(crate) fn current_seq(&self) -> u64 {
        self.commit_seq.load(Ordering::SeqCst)
    }

    pub(crate) fn next_commit_seq(&self) -> u64 {
        self.commit_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn new_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn new_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn stable(&self) -> Timestamp {
        self.global.lock().stable
    }

    pub(crate) fn oldest(&self) -> Timestamp {
        self.global.lock().oldest
    }

    /// Fold a committed durable timestamp into all_durable.
    pub(crate) fn note_durable(&self, ts: Timestamp) {
        if ts.is_set() {
            let mut g = self.global.lock();
            g.all_durable = g.all_durable.max(ts);
        }
    }

    pub(crate) fn txn_began(&self, txn_id: u64, read_ts: Timestamp) {
        self.active_txns.fetch_add(1, Ordering::SeqCst);
        if read_ts.is_set() {
            self.active_reads.lock().insert(txn_id, read_ts);
        }
    }

    pub(crate) fn txn_set_read(&self, txn_id: u64, read_ts: Timestamp) {
        self.active_reads.lock().insert(txn_id, read_ts);
    }

    pub(crate) fn txn_ended(&self, txn_id: u64) {
        self.active_txns.fetch_sub(1, Ordering::SeqCst);
        self.active_reads.lock().remove(&txn_id);
    }

    /// Append one committed transaction's operations to the log.
    pub(crate) fn append_log(
        &self,
        commit_ts: Timestamp,
        durable_ts: Timestamp,
        ops: Vec<LogOp>,
    ) -> Result<()> {
        let mut guard = self.log.lock();
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        writer.append(&LogRecord {
            lsn,
            commit_ts,
            durable_ts,
            ops,
        })?;
        Stats::bump(&self.stats.log_records);
        Ok(())
    }

    /// Write every table's snapshot and the metadata file.
    ///
    /// A precise checkpoint excludes versions committed after the stable
    /// timestamp; a fuzzy one takes the newest committed version of each
    /// key.
    pub(crate) fn checkpoint(&self, precise: bool) -> Result<()> {
        let mut g = self.global.lock();
        if precise && !g.stable.is_set() {
            return Err(Error::InvalidArgument(
                "precise checkpoint requires a stable timestamp".to_string(),
            ));
        }
        let cutoff = if precise { Some(g.stable) } else { None };

        if !self.opts.in_memory {
            let tables = self.tables.read();
            for table in tables.values() {
                let rows = table.checkpoint_rows(cutoff);
                checkpoint::write_snapshot(
                    &home_path(&self.home, &table_file(table.name())),
                    &rows,
                )?;
            }
        }

        // The snapshots now cover every record assigned so far.
        self.checkpoint_lsn.store(
            self.next_lsn.load(Ordering::SeqCst).saturating_sub(1),
            Ordering::SeqCst,
        );
        g.last_checkpoint = g.stable;
        if !self.opts.in_memory {
            self.write_meta_with(&g)?;
        }
        Stats::bump(&self.stats.checkpoints);
        tracing::debug!(home = %self.home.display(), precise, "checkpoint complete");
        Ok(())
    }

    /// Rewrite the metadata file from current state.
    pub(crate) fn persist_meta(&self) -> Result<()> {
        if self.opts.in_memory {
            return Ok(());
        }
        let g = *self.global.lock();
        self.write_meta_with(&g)
    }

    fn write_meta_with(&self, g: &GlobalTimestamps) -> Result<()> {
        let tables = self.tables.read();
        let table_metas = tables
            .values()
            .map(|t| TableMeta {
                name: t.name().to_string(),
                key_format: t.key_format().to_string(),
                value_format: t.value_format().to_string(),
                logged: t.logged(),
                create_config: t.create_config().to_string(),
            })
            .collect();
        let backups = self
            .backups
            .lock()
            .iter()
            .map(|(id, files)| BackupMeta {
                id: id.clone(),
                files: files.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            })
            .collect();
        let meta = Meta {
            tables: table_metas,
            checkpoint_lsn: self.checkpoint_lsn.load(Ordering::SeqCst),
            oldest: g.oldest,
            stable: g.stable,
            backups,
        };
        checkpoint::write_meta(&self.home, &meta)
    }
}

impl std::fmt::Debug for ConnInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnInner")
            .field("home", &self.home)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// A handle to one open database
///
/// Exactly one connection may hold a home directory at a time; a second
/// open reports `Busy`. Dropping the connection without `close()` leaves
/// whatever the log and the last checkpoint made durable, which is exactly
/// the state the crash simulator exercises.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    /// Open (or with `create` set, create) the database in `home`.
    ///
    /// # Errors
    /// - `NotFound` when the home or database does not exist and `create`
    ///   was not given
    /// - `Busy` when another connection holds the home
    /// - `Corruption` when recovery finds a damaged log or snapshot
    pub fn open(home: impl AsRef<Path>, config: &str) -> Result<Connection> {
        let home = home.as_ref();
        let opts = ConnOptions::parse(config)?;
        tracing::info!(
            home = %home.display(),
            in_memory = opts.in_memory,
            log = opts.log_enabled,
            error_prefix = opts.error_prefix.as_deref().unwrap_or(""),
            "opening connection"
        );

        if opts.in_memory {
            let inner = ConnInner::fresh(home.to_path_buf(), opts, None);
            return Ok(Connection {
                inner: Arc::new(inner),
            });
        }

        if !home.exists() {
            if opts.create {
                fs::create_dir_all(home)?;
            } else {
                return Err(Error::NotFound(format!(
                    "home directory {} does not exist",
                    home.display()
                )));
            }
        }

        let lock_file = File::create(home_path(home, LOCK_FILE))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::Busy(format!(
                "database {} is in use by another connection",
                home.display()
            ))
        })?;

        let meta = checkpoint::read_meta(home)?;
        if meta.is_none() && !opts.create {
            return Err(Error::NotFound(format!(
                "no database found in {}",
                home.display()
            )));
        }

        let inner = match meta {
            Some(meta) => ConnInner::recover(home.to_path_buf(), opts, lock_file, meta)?,
            None => {
                let inner = ConnInner::fresh(home.to_path_buf(), opts, Some(lock_file));
                // Reopening without `create` must find the database.
                inner.persist_meta()?;
                inner
            }
        };
        if inner.log_enabled() {
            *inner.log.lock() = Some(LogWriter::open(&home_path(home, LOG_FILE))?);
        }
        Ok(Connection {
            inner: Arc::new(inner),
        })
    }

    /// The home directory this connection was opened on.
    pub fn home(&self) -> &Path {
        self.inner.home()
    }

    /// Open a new session.
    pub fn open_session(&self) -> Result<Session> {
        self.inner.ensure_open()?;
        Ok(Session::new(Arc::clone(&self.inner)))
    }

    /// Close the connection: final checkpoint, release the lock.
    ///
    /// Close is idempotent. Uncommitted transactions on open sessions are
    /// discarded, matching an engine shutdown.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.inner.in_memory() {
            self.inner.checkpoint(false)?;
        }
        *self.inner.log.lock() = None;
        *self.inner.lock.lock() = None;
        tracing::info!(home = %self.inner.home.display(), "connection closed");
        Ok(())
    }

    /// Set global timestamps: `oldest_timestamp`, `stable_timestamp`,
    /// `durable_timestamp`.
    ///
    /// # Errors
    /// `InvalidArgument` for zero values, for oldest later than stable, or
    /// for moving oldest or stable backward.
    pub fn set_timestamp(&self, config: &str) -> Result<()> {
        self.inner.ensure_open()?;
        let map = parse_config(config)?;
        check_keys("connection.set_timestamp", config::SET_TIMESTAMP, &map)?;
        let oldest = config_ts(&map, "oldest_timestamp")?;
        let stable = config_ts(&map, "stable_timestamp")?;
        let durable = config_ts(&map, "durable_timestamp")?;

        let mut g = self.inner.global.lock();
        let new_oldest = oldest.unwrap_or(g.oldest);
        let new_stable = stable.unwrap_or(g.stable);
        if new_oldest.is_set() && new_stable.is_set() && new_oldest > new_stable {
            return Err(Error::InvalidArgument(format!(
                "oldest timestamp {} must not be later than stable timestamp {}",
                new_oldest, new_stable
            )));
        }
        if let Some(ts) = oldest {
            if ts < g.oldest {
                return Err(Error::InvalidArgument(format!(
                    "oldest timestamp {} must not move backward from {}",
                    ts, g.oldest
                )));
            }
            g.oldest = ts;
        }
        if let Some(ts) = stable {
            if ts < g.stable {
                return Err(Error::InvalidArgument(format!(
                    "stable timestamp {} must not move backward from {}",
                    ts, g.stable
                )));
            }
            g.stable = ts;
        }
        if let Some(ts) = durable {
            g.all_durable = g.all_durable.max(ts);
        }
        Ok(())
    }

    /// Query a global timestamp; `get=` defaults to `all_durable`.
    ///
    /// Unset timestamps render as `"0"`.
    pub fn query_timestamp(&self, config: &str) -> Result<String> {
        self.inner.ensure_open()?;
        let map = parse_config(config)?;
        check_keys("connection.query_timestamp", config::QUERY_TIMESTAMP, &map)?;
        let which = map.get_str("get").unwrap_or("all_durable");
        let g = *self.inner.global.lock();
        let ts = match which {
            "oldest" | "oldest_timestamp" => g.oldest,
            "stable" | "stable_timestamp" => g.stable,
            "all_durable" => g.all_durable,
            "last_checkpoint" => g.last_checkpoint,
            "recovery" => g.recovery,
            "pinned" => {
                let reads = self.inner.active_reads.lock();
                let min_read = reads.values().copied().min();
                match min_read {
                    Some(r) if g.oldest.is_set() => g.oldest.min(r),
                    Some(r) => r,
                    None => g.oldest,
                }
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown timestamp to query: {}",
                    other
                )))
            }
        };
        Ok(ts.hex())
    }

    /// Discard committed versions newer than the stable timestamp.
    ///
    /// Logged tables are exempt when logging is enabled. With stable unset
    /// every timestamped commit is discarded. Returns the number of
    /// versions discarded (or, with `dryrun`, the number that would be).
    ///
    /// # Errors
    /// `Busy` while any transaction is active.
    pub fn rollback_to_stable(&self, config: &str) -> Result<u64> {
        self.inner.ensure_open()?;
        let map = parse_config(config)?;
        check_keys(
            "connection.rollback_to_stable",
            config::ROLLBACK_TO_STABLE,
            &map,
        )?;
        let dryrun = map.get_bool("dryrun", false);
        if self.inner.active_txns.load(Ordering::SeqCst) > 0 {
            return Err(Error::Busy(
                "rollback_to_stable requires no active transactions".to_string(),
            ));
        }
        let stable = self.inner.stable();
        let mut discarded = 0u64;
        let tables = self.inner.tables.read();
        for table in tables.values() {
            if table.logged() && self.inner.log_enabled() {
                continue;
            }
            discarded += if dryrun {
                table.rollback_to_stable_dryrun(stable) as u64
            } else {
                table.rollback_to_stable(stable) as u64
            };
        }
        drop(tables);
        if !dryrun {
            Stats::add(&self.inner.stats.rts_discarded, discarded);
            tracing::debug!(stable = %stable, discarded, "rollback_to_stable complete");
        }
        Ok(discarded)
    }

    pub(crate) fn inner(&self) -> &Arc<ConnInner> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_create_or_existing() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("db");

        let err = Connection::open(&home, "").unwrap_err();
        assert!(err.is_not_found());

        let conn = Connection::open(&home, "create").unwrap();
        conn.close().unwrap();

        // Now the database exists and opens without create.
        let conn = Connection::open(&home, "").unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_second_connection_is_busy() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create").unwrap();

        let err = Connection::open(dir.path(), "create").unwrap_err();
        assert!(err.is_busy());

        conn.close().unwrap();
        let conn = Connection::open(dir.path(), "").unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_unknown_open_key_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Connection::open(dir.path(), "create,banana=1").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_cache_size_minimum() {
        let dir = TempDir::new().unwrap();
        let err = Connection::open(dir.path(), "create,cache_size=1K").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_set_and_query_timestamps() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create").unwrap();

        assert_eq!(conn.query_timestamp("get=stable").unwrap(), "0");
        conn.set_timestamp("oldest_timestamp=5,stable_timestamp=a").unwrap();
        assert_eq!(conn.query_timestamp("get=stable").unwrap(), "a");
        assert_eq!(conn.query_timestamp("get=oldest").unwrap(), "5");
        // Default query is all_durable, still unset.
        assert_eq!(conn.query_timestamp("").unwrap(), "0");

        conn.close().unwrap();
    }

    #[test]
    fn test_set_timestamp_validation() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create").unwrap();

        conn.set_timestamp("stable_timestamp=10").unwrap();
        // Oldest may not pass stable.
        assert!(conn.set_timestamp("oldest_timestamp=20").is_err());
        // Zero is reserved.
        assert!(conn.set_timestamp("stable_timestamp=0").is_err());
        // Stable may not move backward.
        assert!(conn.set_timestamp("stable_timestamp=f").is_err());
        // Forward movement is fine.
        conn.set_timestamp("oldest_timestamp=10,stable_timestamp=20").unwrap();

        conn.close().unwrap();
    }

    #[test]
    fn test_timestamps_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create").unwrap();
        conn.set_timestamp("oldest_timestamp=3,stable_timestamp=8").unwrap();
        conn.close().unwrap();

        let conn = Connection::open(dir.path(), "").unwrap();
        assert_eq!(conn.query_timestamp("get=stable").unwrap(), "8");
        assert_eq!(conn.query_timestamp("get=oldest").unwrap(), "3");
        assert_eq!(conn.query_timestamp("get=recovery").unwrap(), "8");
        conn.close().unwrap();
    }

    #[test]
    fn test_in_memory_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create,in_memory=true").unwrap();
        conn.close().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create").unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(conn.open_session().is_err());
    }
}
