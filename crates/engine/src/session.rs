//! Sessions: the per-thread façade over one connection
//!
//! A session owns at most one running transaction. Operations outside a
//! transaction autocommit, one operation per implicit transaction. The
//! transaction lifecycle (begin, timestamp, prepare, commit, rollback) and
//! every cursor a session opens evaluate against the shared connection
//! state.

use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use wiredtest_core::config::{self, check_keys, parse_config};
use wiredtest_core::{Error, FormatType, Key, Result, Timestamp, Value};

use crate::backup::BackupCursor;
use crate::connection::{config_ts, ConnInner};
use crate::cursor::{Cursor, ListCursor, TableCursor};
use crate::layout::{home_path, table_file, table_for_file, LOG_FILE, PREP_PREFIX};
use crate::log::{read_log, LogOp};
use crate::stats::Stats;
use crate::store::Table;
use crate::txn::{Isolation, ReadView, TxnPhase, TxnState};

fn log_op(table: &str, key: Key, value: Option<Value>) -> LogOp {
    match value {
        Some(value) => LogOp::Put {
            table: table.to_string(),
            key,
            value,
        },
        None => LogOp::Remove {
            table: table.to_string(),
            key,
        },
    }
}

/// Shared session state referenced by the session handle and its cursors
pub(crate) struct SessionInner {
    pub(crate) conn: Arc<ConnInner>,
    id: u64,
    txn: Mutex<Option<TxnState>>,
}

impl SessionInner {
    /// The read view current operations evaluate under.
    ///
    /// # Errors
    /// `InvalidArgument` once the transaction is prepared; a prepared
    /// transaction only accepts timestamping and resolution.
    pub(crate) fn current_view(&self) -> Result<ReadView> {
        self.conn.ensure_open()?;
        let txn = self.txn.lock();
        match txn.as_ref() {
            Some(t) if t.is_prepared() => Err(Error::InvalidArgument(
                "transaction is prepared".to_string(),
            )),
            Some(t) => Ok(t.view(self.conn.current_seq())),
            None => Ok(ReadView::autocommit(self.conn.current_seq())),
        }
    }

    /// True while an explicit transaction is running on this session.
    pub(crate) fn in_transaction(&self) -> bool {
        self.txn.lock().is_some()
    }

    /// Write `value` (or a tombstone) to `table`, inside the running
    /// transaction or as a single autocommitted operation.
    pub(crate) fn apply_write(
        &self,
        table: &Arc<Table>,
        key: Key,
        value: Option<Value>,
    ) -> Result<()> {
        self.conn.ensure_open()?;
        let mut guard = self.txn.lock();
        match guard.as_mut() {
            Some(txn) => {
                if txn.is_prepared() {
                    return Err(Error::InvalidArgument(
                        "transaction is prepared".to_string(),
                    ));
                }
                let view = txn.view(self.conn.current_seq());
                table.put(txn.id, &view, key.clone(), value.clone())?;
                txn.record_write(table.name(), &key);
                if table.logged() && self.conn.log_enabled() {
                    txn.ops.push(log_op(table.name(), key, value));
                }
                Ok(())
            }
            None => {
                let txn_id = self.conn.new_txn_id();
                let view = ReadView::autocommit(self.conn.current_seq());
                table.put(txn_id, &view, key.clone(), value.clone())?;
                let seq = self.conn.next_commit_seq();
                table.commit_key(&key, txn_id, seq, Timestamp::NONE, Timestamp::NONE);
                if table.logged() && self.conn.log_enabled() {
                    self.conn.append_log(
                        Timestamp::NONE,
                        Timestamp::NONE,
                        vec![log_op(table.name(), key, value)],
                    )?;
                }
                Stats::bump(&self.conn.stats.txn_commits);
                Ok(())
            }
        }
    }

    fn prep_marker(&self, txn: &TxnState) -> PathBuf {
        let id = txn.prepared_id.unwrap_or(txn.id);
        home_path(self.conn.home(), &format!("{}.{:016x}", PREP_PREFIX, id))
    }

    fn discard_writes(&self, txn: &TxnState) {
        for (table, key) in txn.writes.iter().rev() {
            if let Ok(t) = self.conn.table(table) {
                t.rollback_key(key, txn.id);
            }
        }
    }

    fn finish(&self, txn: &TxnState) {
        self.conn.txn_ended(txn.id);
        if txn.is_prepared() && !self.conn.in_memory() {
            let _ = fs::remove_file(self.prep_marker(txn));
        }
    }

    fn rollback_current(&self) {
        let taken = self.txn.lock().take();
        if let Some(txn) = taken {
            self.discard_writes(&txn);
            self.finish(&txn);
            Stats::bump(&self.conn.stats.txn_rollbacks);
        }
    }
}

/// A single-threaded execution context over one connection
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(conn: Arc<ConnInner>) -> Session {
        let id = conn.new_session_id();
        Session {
            inner: Arc::new(SessionInner {
                conn,
                id,
                txn: Mutex::new(None),
            }),
        }
    }

    /// Create a table. Creating an existing table is a no-op.
    ///
    /// # Errors
    /// `InvalidArgument` for non-`table:` URIs, bad formats, fixed-length
    /// bit fields as a key format, or when called inside a transaction.
    pub fn create(&self, uri: &str, config: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        if self.inner.in_transaction() {
            return Err(Error::InvalidArgument(
                "create is not permitted in a transaction".to_string(),
            ));
        }
        let name = table_uri(uri, "create")?;
        let map = parse_config(config)?;
        check_keys("session.create", config::SESSION_CREATE, &map)?;

        let key_format = FormatType::parse(map.get_str("key_format").unwrap_or("u"))?;
        let value_format = FormatType::parse(map.get_str("value_format").unwrap_or("u"))?;
        if matches!(key_format, FormatType::FixedBits { .. }) {
            return Err(Error::InvalidArgument(
                "fixed-length bit fields are not a valid key format".to_string(),
            ));
        }

        let table_logged = match map.get("log") {
            Some(item) => {
                let nested = item.as_nested().ok_or_else(|| {
                    Error::InvalidArgument("log requires a (...) sub-configuration".to_string())
                })?;
                check_keys("session.create.log", config::LOG_SUBCONFIG, nested)?;
                nested.get_bool("enabled", true)
            }
            None => true,
        };
        let logged = self.inner.conn.log_enabled() && table_logged;

        {
            let mut tables = self.inner.conn.tables.write();
            if tables.contains_key(name) {
                return Ok(());
            }
            tables.insert(
                name.to_string(),
                Arc::new(Table::new(name, key_format, value_format, logged, config)),
            );
        }
        self.inner.conn.persist_meta()?;
        tracing::debug!(table = name, logged, "table created");
        Ok(())
    }

    /// Drop a table and its on-disk snapshot.
    ///
    /// # Errors
    /// - `NotFound` when the table does not exist, unless `force` is given
    /// - `Busy` while cursors are open on the table
    #[allow(clippy::should_implement_trait)]
    pub fn drop(&self, uri: &str, config: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        if self.inner.in_transaction() {
            return Err(Error::InvalidArgument(
                "drop is not permitted in a transaction".to_string(),
            ));
        }
        let name = table_uri(uri, "drop")?;
        let map = parse_config(config)?;
        check_keys("session.drop", config::SESSION_DROP, &map)?;
        let force = map.get_bool("force", false);

        {
            let mut tables = self.inner.conn.tables.write();
            let Some(table) = tables.get(name) else {
                if force {
                    return Ok(());
                }
                return Err(Error::NotFound(format!("table:{} does not exist", name)));
            };
            if table.open_cursor_count() > 0 {
                return Err(Error::Busy(format!(
                    "table:{} has open cursors",
                    name
                )));
            }
            tables.remove(name);
        }
        if !self.inner.conn.in_memory() {
            let _ = fs::remove_file(home_path(self.inner.conn.home(), &table_file(name)));
        }
        self.inner.conn.persist_meta()?;
        Ok(())
    }

    /// Check that a table exists and is quiescent.
    ///
    /// # Errors
    /// `NotFound` for a missing table, `Busy` while cursors are open on it.
    pub fn verify(&self, uri: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        let name = table_uri(uri, "verify")?;
        let table = self.inner.conn.table(name)?;
        if table.open_cursor_count() > 0 {
            return Err(Error::Busy(format!("table:{} has open cursors", name)));
        }
        Ok(())
    }

    /// Open a cursor on `uri`.
    ///
    /// Supported URIs: `table:<name>`, `file:<name>.wt`, `metadata:`,
    /// `metadata:create`, `statistics:`, `statistics:table:<name>`, `log:`,
    /// and `backup:`.
    pub fn open_cursor(&self, uri: &str, cfg: &str) -> Result<Box<dyn Cursor>> {
        self.inner.conn.ensure_open()?;
        let map = parse_config(cfg)?;
        check_keys("session.open_cursor", config::OPEN_CURSOR, &map)?;

        if uri == "backup:" {
            return Ok(Box::new(self.open_backup_cursor(cfg)?));
        }
        if let Some(name) = uri.strip_prefix("table:") {
            let table = self.inner.conn.table(name)?;
            return Ok(Box::new(TableCursor::new(
                Arc::clone(&self.inner),
                table,
                uri,
            )));
        }
        if let Some(file) = uri.strip_prefix("file:") {
            let name = table_for_file(file).ok_or_else(|| {
                Error::InvalidArgument(format!("{} is not a table file", uri))
            })?;
            let table = self.inner.conn.table(name)?;
            return Ok(Box::new(TableCursor::new(
                Arc::clone(&self.inner),
                table,
                uri,
            )));
        }
        if uri == "metadata:" || uri == "metadata:create" {
            let tables = self.inner.conn.tables.read();
            let rows = tables
                .values()
                .map(|t| {
                    (
                        Key::Str(format!("table:{}", t.name())),
                        Value::Str(t.create_config().to_string()),
                    )
                })
                .collect();
            return Ok(Box::new(ListCursor::new(uri, rows)));
        }
        if let Some(name) = uri.strip_prefix("statistics:table:") {
            let table = self.inner.conn.table(name)?;
            let rows = vec![
                (
                    Key::Str("cursors_open".to_string()),
                    Value::Int(table.open_cursor_count() as i64),
                ),
                (
                    Key::Str("entries".to_string()),
                    Value::Int(table.entry_count() as i64),
                ),
            ];
            return Ok(Box::new(ListCursor::new(uri, rows)));
        }
        if uri == "statistics:" {
            if !self.inner.conn.statistics_configured() {
                return Err(Error::InvalidArgument(
                    "statistics were not configured at connection open".to_string(),
                ));
            }
            let mut rows: Vec<(Key, Value)> = self
                .inner
                .conn
                .stats
                .snapshot()
                .into_iter()
                .map(|(name, v)| (Key::Str(name.to_string()), Value::Int(v as i64)))
                .collect();
            rows.push((
                Key::Str("cache_bytes_max".to_string()),
                Value::Int(self.inner.conn.cache_size() as i64),
            ));
            rows.sort_by(|(a, _), (b, _)| a.cmp(b));
            return Ok(Box::new(ListCursor::new(uri, rows)));
        }
        if uri == "log:" {
            if !self.inner.conn.log_enabled() {
                return Err(Error::InvalidArgument(
                    "logging is not enabled".to_string(),
                ));
            }
            let records = read_log(&home_path(self.inner.conn.home(), LOG_FILE))?;
            let rows = records
                .iter()
                .map(|rec| {
                    (
                        Key::Record(rec.lsn),
                        Value::Str(format!(
                            "commit_ts={},durable_ts={},ops={}",
                            rec.commit_ts,
                            rec.durable_ts,
                            rec.ops.len()
                        )),
                    )
                })
                .collect();
            return Ok(Box::new(ListCursor::new(uri, rows)));
        }
        Err(Error::InvalidArgument(format!(
            "unsupported cursor URI: {}",
            uri
        )))
    }

    /// Open a backup cursor, the typed entry point for backup protocols.
    pub fn open_backup_cursor(&self, cfg: &str) -> Result<BackupCursor> {
        self.inner.conn.ensure_open()?;
        BackupCursor::open(Arc::clone(&self.inner.conn), cfg)
    }

    /// Begin an explicit transaction.
    ///
    /// # Errors
    /// `InvalidArgument` when a transaction is already running, or when
    /// `read_timestamp` is zero or older than the oldest timestamp.
    pub fn begin_transaction(&self, cfg: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        let map = parse_config(cfg)?;
        check_keys("session.begin_transaction", config::BEGIN_TRANSACTION, &map)?;

        let mut guard = self.inner.txn.lock();
        if guard.is_some() {
            return Err(Error::InvalidArgument(
                "a transaction is already running".to_string(),
            ));
        }

        let isolation = match map.get_str("isolation") {
            Some(s) => Isolation::parse(s)?,
            None => Isolation::default(),
        };
        let read_ts = config_ts(&map, "read_timestamp")?;
        if let Some(ts) = read_ts {
            let oldest = self.inner.conn.oldest();
            if oldest.is_set() && ts < oldest {
                return Err(Error::InvalidArgument(format!(
                    "read timestamp {} is older than the oldest timestamp {}",
                    ts, oldest
                )));
            }
        }

        let id = self.inner.conn.new_txn_id();
        let mut txn = TxnState::new(id, self.inner.conn.current_seq(), isolation);
        txn.read_ts = read_ts.unwrap_or(Timestamp::NONE);
        txn.ignore_prepare = map.get_bool("ignore_prepare", false);
        txn.no_timestamp = map.get_bool("no_timestamp", false);
        txn.name = map.get_str("name").map(str::to_string);
        self.inner.conn.txn_began(id, txn.read_ts);
        tracing::trace!(session = self.inner.id, txn = id, ?isolation, "transaction begun");
        *guard = Some(txn);
        Ok(())
    }

    /// Stage timestamps on the running transaction.
    pub fn timestamp_transaction(&self, cfg: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        let map = parse_config(cfg)?;
        check_keys(
            "session.timestamp_transaction",
            config::TIMESTAMP_TRANSACTION,
            &map,
        )?;

        let mut guard = self.inner.txn.lock();
        let txn = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument("no transaction is running".to_string()))?;

        if let Some(ts) = config_ts(&map, "read_timestamp")? {
            if txn.read_ts.is_set() {
                return Err(Error::InvalidArgument(
                    "read timestamp is already set".to_string(),
                ));
            }
            let oldest = self.inner.conn.oldest();
            if oldest.is_set() && ts < oldest {
                return Err(Error::InvalidArgument(format!(
                    "read timestamp {} is older than the oldest timestamp {}",
                    ts, oldest
                )));
            }
            txn.read_ts = ts;
            self.inner.conn.txn_set_read(txn.id, ts);
        }
        if let Some(ts) = config_ts(&map, "commit_timestamp")? {
            if txn.no_timestamp {
                return Err(Error::InvalidArgument(
                    "transaction was begun with no_timestamp".to_string(),
                ));
            }
            txn.commit_ts = ts;
        }
        if let Some(ts) = config_ts(&map, "durable_timestamp")? {
            if !txn.is_prepared() {
                return Err(Error::InvalidArgument(
                    "durable timestamp requires a prepared transaction".to_string(),
                ));
            }
            txn.durable_ts = ts;
        }
        if let Some(ts) = config_ts(&map, "prepare_timestamp")? {
            if txn.is_prepared() {
                return Err(Error::InvalidArgument(
                    "transaction is already prepared".to_string(),
                ));
            }
            txn.prepare_ts = ts;
        }
        Ok(())
    }

    /// Prepare the running transaction at a prepare timestamp.
    ///
    /// # Errors
    /// `InvalidArgument` without a running unprepared transaction, without
    /// a prepare timestamp, for a prepare timestamp earlier than stable, or
    /// when the transaction wrote under non-snapshot isolation.
    pub fn prepare_transaction(&self, cfg: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        let map = parse_config(cfg)?;
        check_keys(
            "session.prepare_transaction",
            config::PREPARE_TRANSACTION,
            &map,
        )?;

        let mut guard = self.inner.txn.lock();
        let txn = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument("no transaction is running".to_string()))?;
        if txn.is_prepared() {
            return Err(Error::InvalidArgument(
                "transaction is already prepared".to_string(),
            ));
        }

        let prepare_ts = match config_ts(&map, "prepare_timestamp")? {
            Some(ts) => ts,
            None if txn.prepare_ts.is_set() => txn.prepare_ts,
            None => {
                return Err(Error::InvalidArgument(
                    "prepare timestamp is required".to_string(),
                ))
            }
        };
        let stable = self.inner.conn.stable();
        if stable.is_set() && prepare_ts < stable {
            return Err(Error::InvalidArgument(format!(
                "prepare timestamp {} is earlier than the stable timestamp {}",
                prepare_ts, stable
            )));
        }
        if !txn.writes.is_empty() && txn.isolation != Isolation::Snapshot {
            return Err(Error::InvalidArgument(
                "prepare requires snapshot isolation".to_string(),
            ));
        }
        if let Some(id_str) = map.get_str("prepared_id") {
            let id = u64::from_str_radix(id_str, 16).map_err(|_| {
                Error::InvalidArgument(format!("invalid prepared_id: {}", id_str))
            })?;
            txn.prepared_id = Some(id);
        }

        for (table, key) in &txn.writes {
            if let Ok(t) = self.inner.conn.table(table) {
                t.prepare_key(key, txn.id, prepare_ts);
            }
        }
        txn.prepare_ts = prepare_ts;
        txn.phase = TxnPhase::Prepared { prepare_ts };
        if !self.inner.conn.in_memory() {
            fs::write(self.inner.prep_marker(txn), [])?;
        }
        Stats::bump(&self.inner.conn.stats.txn_prepares);
        Ok(())
    }

    /// Commit the running transaction.
    ///
    /// A failed commit rolls the transaction back; either way the session
    /// has no transaction afterwards.
    pub fn commit_transaction(&self, cfg: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        let map = parse_config(cfg)?;
        check_keys(
            "session.commit_transaction",
            config::COMMIT_TRANSACTION,
            &map,
        )?;

        let mut txn = self
            .inner
            .txn
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidArgument("no transaction is running".to_string()))?;

        let result = self.commit_inner(&mut txn, &map);
        match result {
            Ok(()) => {
                self.inner.finish(&txn);
                Stats::bump(&self.inner.conn.stats.txn_commits);
                Ok(())
            }
            Err(e) => {
                self.inner.discard_writes(&txn);
                self.inner.finish(&txn);
                Stats::bump(&self.inner.conn.stats.txn_rollbacks);
                Err(e)
            }
        }
    }

    fn commit_inner(&self, txn: &mut TxnState, map: &wiredtest_core::ConfigMap) -> Result<()> {
        if let Some(ts) = config_ts(map, "commit_timestamp")? {
            if txn.no_timestamp {
                return Err(Error::InvalidArgument(
                    "transaction was begun with no_timestamp".to_string(),
                ));
            }
            txn.commit_ts = ts;
        }
        if let Some(ts) = config_ts(map, "durable_timestamp")? {
            if !txn.is_prepared() {
                return Err(Error::InvalidArgument(
                    "durable timestamp requires a prepared transaction".to_string(),
                ));
            }
            txn.durable_ts = ts;
        }

        match txn.phase {
            TxnPhase::Prepared { prepare_ts } => {
                if !txn.commit_ts.is_set() {
                    return Err(Error::InvalidArgument(
                        "a prepared transaction requires a commit timestamp".to_string(),
                    ));
                }
                if !txn.durable_ts.is_set() {
                    return Err(Error::InvalidArgument(
                        "a prepared transaction requires a durable timestamp".to_string(),
                    ));
                }
                if txn.commit_ts < prepare_ts {
                    return Err(Error::InvalidArgument(format!(
                        "commit timestamp {} is earlier than the prepare timestamp {}",
                        txn.commit_ts, prepare_ts
                    )));
                }
                if txn.durable_ts < txn.commit_ts {
                    return Err(Error::InvalidArgument(format!(
                        "durable timestamp {} is earlier than the commit timestamp {}",
                        txn.durable_ts, txn.commit_ts
                    )));
                }
            }
            TxnPhase::Running => {
                if txn.commit_ts.is_set() {
                    let stable = self.inner.conn.stable();
                    if stable.is_set() && txn.commit_ts <= stable {
                        return Err(Error::InvalidArgument(format!(
                            "commit timestamp {} must be after the stable timestamp {}",
                            txn.commit_ts, stable
                        )));
                    }
                    let oldest = self.inner.conn.oldest();
                    if oldest.is_set() && txn.commit_ts < oldest {
                        return Err(Error::InvalidArgument(format!(
                            "commit timestamp {} is older than the oldest timestamp {}",
                            txn.commit_ts, oldest
                        )));
                    }
                    txn.durable_ts = txn.commit_ts;
                }
            }
        }

        let seq = self.inner.conn.next_commit_seq();
        for (table, key) in &txn.writes {
            if let Ok(t) = self.inner.conn.table(table) {
                t.commit_key(key, txn.id, seq, txn.commit_ts, txn.durable_ts);
            }
        }
        if !txn.ops.is_empty() {
            self.inner.conn.append_log(
                txn.commit_ts,
                txn.durable_ts,
                std::mem::take(&mut txn.ops),
            )?;
        }
        self.inner.conn.note_durable(txn.durable_ts);
        Ok(())
    }

    /// Roll back the running transaction, discarding its writes.
    pub fn rollback_transaction(&self, cfg: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        let map = parse_config(cfg)?;
        check_keys(
            "session.rollback_transaction",
            config::ROLLBACK_TRANSACTION,
            &map,
        )?;
        if !self.inner.in_transaction() {
            return Err(Error::InvalidArgument(
                "no transaction is running".to_string(),
            ));
        }
        self.inner.rollback_current();
        Ok(())
    }

    /// Write a checkpoint of every table.
    ///
    /// # Errors
    /// `InvalidArgument` inside a transaction, or for a precise checkpoint
    /// without a stable timestamp.
    pub fn checkpoint(&self, cfg: &str) -> Result<()> {
        self.inner.conn.ensure_open()?;
        let map = parse_config(cfg)?;
        check_keys("session.checkpoint", config::CHECKPOINT, &map)?;
        if self.inner.in_transaction() {
            return Err(Error::InvalidArgument(
                "checkpoint is not permitted in a transaction".to_string(),
            ));
        }
        self.inner.conn.checkpoint(map.get_bool("precise", false))
    }

    /// True while an explicit transaction is running.
    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    /// Close the session, rolling back any running transaction.
    pub fn close(&self) -> Result<()> {
        self.inner.rollback_current();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.rollback_current();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("in_transaction", &self.inner.in_transaction())
            .finish()
    }
}

fn table_uri<'a>(uri: &'a str, what: &str) -> Result<&'a str> {
    let name = uri
        .strip_prefix("table:")
        .ok_or_else(|| Error::InvalidArgument(format!("{} requires a table: URI", what)))?;
    if name.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{} requires a table name",
            what
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Connection {
        Connection::open(dir.path(), "create").unwrap()
    }

    fn str_table(session: &Session, name: &str) {
        session
            .create(
                &format!("table:{}", name),
                "key_format=S,value_format=S",
            )
            .unwrap();
    }

    fn put(session: &Session, uri: &str, key: &str, value: &str) -> Result<()> {
        let mut c = session.open_cursor(uri, "")?;
        c.set_key(Key::Str(key.to_string()));
        c.set_value(Value::Str(value.to_string()));
        c.insert()
    }

    fn get(session: &Session, uri: &str, key: &str) -> Result<Option<String>> {
        let mut c = session.open_cursor(uri, "")?;
        c.set_key(Key::Str(key.to_string()));
        if !c.search()? {
            return Ok(None);
        }
        match c.get_value()? {
            Value::Str(s) => Ok(Some(s)),
            other => panic!("unexpected value {:?}", other),
        }
    }

    // ---------------------------------------------------------------
    // Basic data path
    // ---------------------------------------------------------------

    #[test]
    fn test_autocommit_insert_and_search() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");

        put(&session, "table:t", "a", "1").unwrap();
        assert_eq!(get(&session, "table:t", "a").unwrap(), Some("1".to_string()));
        assert_eq!(get(&session, "table:t", "zz").unwrap(), None);
        conn.close().unwrap();
    }

    #[test]
    fn test_create_is_idempotent_and_validated() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        str_table(&session, "t");

        assert!(session.create("table:t2", "key_format=8t").is_err());
        assert!(session.create("table:t2", "compression=zstd").is_err());
        assert!(session.create("lsm:t2", "").is_err());
        conn.close().unwrap();
    }

    #[test]
    fn test_remove_missing_key_not_found() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");

        let mut c = session.open_cursor("table:t", "").unwrap();
        c.set_key(Key::Str("ghost".to_string()));
        assert!(c.remove().unwrap_err().is_not_found());
        conn.close().unwrap();
    }

    #[test]
    fn test_cursor_iteration_in_key_order() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        for key in ["b", "a", "c"] {
            put(&session, "table:t", key, key).unwrap();
        }

        let mut c = session.open_cursor("table:t", "").unwrap();
        let mut keys = Vec::new();
        while c.next().unwrap() {
            match c.get_key().unwrap() {
                Key::Str(s) => keys.push(s),
                other => panic!("unexpected key {:?}", other),
            }
        }
        assert_eq!(keys, ["a", "b", "c"]);
        // Past the end the cursor restarts.
        assert!(c.next().unwrap());
        assert_eq!(c.get_key().unwrap(), Key::Str("a".to_string()));
        conn.close().unwrap();
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    #[test]
    fn test_txn_commit_and_rollback() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        let reader = conn.open_session().unwrap();
        str_table(&session, "t");

        session.begin_transaction("").unwrap();
        put(&session, "table:t", "a", "1").unwrap();
        // Uncommitted writes are invisible to other sessions.
        assert_eq!(get(&reader, "table:t", "a").unwrap(), None);
        session.commit_transaction("").unwrap();
        assert_eq!(get(&reader, "table:t", "a").unwrap(), Some("1".to_string()));

        session.begin_transaction("").unwrap();
        put(&session, "table:t", "a", "2").unwrap();
        session.rollback_transaction("").unwrap();
        assert_eq!(get(&reader, "table:t", "a").unwrap(), Some("1".to_string()));
        conn.close().unwrap();
    }

    #[test]
    fn test_snapshot_isolation_pins_reads() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let writer = conn.open_session().unwrap();
        let reader = conn.open_session().unwrap();
        str_table(&writer, "t");
        put(&writer, "table:t", "a", "old").unwrap();

        reader.begin_transaction("isolation=snapshot").unwrap();
        assert_eq!(get(&reader, "table:t", "a").unwrap(), Some("old".to_string()));
        put(&writer, "table:t", "a", "new").unwrap();
        // The snapshot still sees the begin-time state.
        assert_eq!(get(&reader, "table:t", "a").unwrap(), Some("old".to_string()));
        reader.rollback_transaction("").unwrap();
        assert_eq!(get(&reader, "table:t", "a").unwrap(), Some("new".to_string()));
        conn.close().unwrap();
    }

    #[test]
    fn test_write_conflict_rolls_back_loser() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let s1 = conn.open_session().unwrap();
        let s2 = conn.open_session().unwrap();
        str_table(&s1, "t");

        s1.begin_transaction("").unwrap();
        s2.begin_transaction("").unwrap();
        put(&s1, "table:t", "a", "1").unwrap();
        let err = put(&s2, "table:t", "a", "2").unwrap_err();
        assert!(err.is_rollback());
        assert_eq!(err.rollback_reason(), Some("conflict between concurrent operations"));

        s2.rollback_transaction("").unwrap();
        s1.commit_transaction("").unwrap();
        assert_eq!(get(&s2, "table:t", "a").unwrap(), Some("1".to_string()));
        conn.close().unwrap();
    }

    #[test]
    fn test_timestamped_reads_see_history() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        conn.set_timestamp("oldest_timestamp=1").unwrap();

        for (value, ts) in [("v10", "a"), ("v20", "14")] {
            session.begin_transaction("").unwrap();
            put(&session, "table:t", "k", value).unwrap();
            session
                .commit_transaction(&format!("commit_timestamp={}", ts))
                .unwrap();
        }

        session.begin_transaction("read_timestamp=a").unwrap();
        assert_eq!(get(&session, "table:t", "k").unwrap(), Some("v10".to_string()));
        session.rollback_transaction("").unwrap();

        session.begin_transaction("read_timestamp=ff").unwrap();
        assert_eq!(get(&session, "table:t", "k").unwrap(), Some("v20".to_string()));
        session.rollback_transaction("").unwrap();

        // all_durable tracks the newest committed durable timestamp.
        assert_eq!(conn.query_timestamp("get=all_durable").unwrap(), "14");
        conn.close().unwrap();
    }

    #[test]
    fn test_commit_timestamp_validation() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        conn.set_timestamp("stable_timestamp=10").unwrap();

        session.begin_transaction("").unwrap();
        put(&session, "table:t", "a", "1").unwrap();
        // At or before stable is rejected, and the transaction is gone.
        assert!(session.commit_transaction("commit_timestamp=10").is_err());
        assert!(!session.in_transaction());
        assert_eq!(get(&session, "table:t", "a").unwrap(), None);

        session.begin_transaction("").unwrap();
        put(&session, "table:t", "a", "1").unwrap();
        session.commit_transaction("commit_timestamp=11").unwrap();
        assert_eq!(get(&session, "table:t", "a").unwrap(), Some("1".to_string()));
        conn.close().unwrap();
    }

    #[test]
    fn test_read_timestamp_below_oldest_rejected() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        conn.set_timestamp("oldest_timestamp=10,stable_timestamp=10").unwrap();

        assert!(session.begin_transaction("read_timestamp=5").is_err());
        assert!(session.begin_transaction("read_timestamp=0").is_err());
        session.begin_transaction("read_timestamp=10").unwrap();
        session.rollback_transaction("").unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_modify_requires_transaction() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        put(&session, "table:t", "a", "abcdef").unwrap();

        let mut c = session.open_cursor("table:t", "").unwrap();
        c.set_key(Key::Str("a".to_string()));
        assert!(c.modify(&[crate::cursor::Modify::new("XY", 0, 2)]).is_err());

        session.begin_transaction("").unwrap();
        c.set_key(Key::Str("a".to_string()));
        c.modify(&[crate::cursor::Modify::new("XY", 0, 2)]).unwrap();
        drop(c);
        session.commit_transaction("").unwrap();
        assert_eq!(get(&session, "table:t", "a").unwrap(), Some("XYcdef".to_string()));
        conn.close().unwrap();
    }

    // ---------------------------------------------------------------
    // Prepared transactions
    // ---------------------------------------------------------------

    #[test]
    fn test_prepare_commit_lifecycle() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let preparer = conn.open_session().unwrap();
        let reader = conn.open_session().unwrap();
        str_table(&preparer, "t");
        conn.set_timestamp("oldest_timestamp=1,stable_timestamp=5").unwrap();

        preparer.begin_transaction("").unwrap();
        put(&preparer, "table:t", "a", "1").unwrap();
        preparer.prepare_transaction("prepare_timestamp=10").unwrap();

        // Writes and reads on the prepared session are refused.
        assert!(put(&preparer, "table:t", "b", "2").is_err());

        // A reader past the prepare timestamp conflicts.
        reader.begin_transaction("read_timestamp=14").unwrap();
        let err = get(&reader, "table:t", "a").unwrap_err();
        assert!(err.is_prepare_conflict());
        reader.rollback_transaction("").unwrap();

        // ignore_prepare skips to the older state instead.
        reader
            .begin_transaction("read_timestamp=14,ignore_prepare=true")
            .unwrap();
        assert_eq!(get(&reader, "table:t", "a").unwrap(), None);
        reader.rollback_transaction("").unwrap();

        // Commit requires both timestamps, correctly ordered.
        preparer
            .commit_transaction("commit_timestamp=14,durable_timestamp=1e")
            .unwrap();

        reader.begin_transaction("read_timestamp=14").unwrap();
        assert_eq!(get(&reader, "table:t", "a").unwrap(), Some("1".to_string()));
        reader.rollback_transaction("").unwrap();
        assert_eq!(conn.query_timestamp("get=all_durable").unwrap(), "1e");
        conn.close().unwrap();
    }

    #[test]
    fn test_prepared_commit_timestamp_rules() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");

        session.begin_transaction("").unwrap();
        put(&session, "table:t", "a", "1").unwrap();
        session.prepare_transaction("prepare_timestamp=10").unwrap();
        // Missing timestamps fail the commit, which rolls back.
        assert!(session.commit_transaction("").is_err());
        assert!(!session.in_transaction());

        session.begin_transaction("").unwrap();
        put(&session, "table:t", "a", "1").unwrap();
        session.prepare_transaction("prepare_timestamp=10").unwrap();
        // Commit below prepare is rejected.
        let err = session
            .commit_transaction("commit_timestamp=5,durable_timestamp=5")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        conn.close().unwrap();
    }

    #[test]
    fn test_prepare_requires_timestamp_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");

        session.begin_transaction("").unwrap();
        assert!(session.prepare_transaction("").is_err());
        session.rollback_transaction("").unwrap();

        session.begin_transaction("isolation=read-committed").unwrap();
        put(&session, "table:t", "a", "1").unwrap();
        assert!(session.prepare_transaction("prepare_timestamp=10").is_err());
        session.rollback_transaction("").unwrap();

        // Staging the timestamp via timestamp_transaction also works.
        session.begin_transaction("").unwrap();
        put(&session, "table:t", "a", "1").unwrap();
        session.timestamp_transaction("prepare_timestamp=10").unwrap();
        session.prepare_transaction("").unwrap();
        session
            .commit_transaction("commit_timestamp=10,durable_timestamp=10")
            .unwrap();
        conn.close().unwrap();
    }

    // ---------------------------------------------------------------
    // DDL and auxiliary cursors
    // ---------------------------------------------------------------

    #[test]
    fn test_drop_busy_with_open_cursor() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");

        let cursor = session.open_cursor("table:t", "").unwrap();
        assert!(session.drop("table:t", "").unwrap_err().is_busy());
        assert!(session.verify("table:t").unwrap_err().is_busy());
        drop(cursor);

        session.verify("table:t").unwrap();
        session.drop("table:t", "").unwrap();
        assert!(session.verify("table:t").unwrap_err().is_not_found());
        assert!(session.drop("table:t", "").unwrap_err().is_not_found());
        session.drop("table:t", "force").unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_metadata_cursor_lists_tables() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "alpha");
        str_table(&session, "beta");

        let mut c = session.open_cursor("metadata:", "").unwrap();
        assert!(c.next().unwrap());
        assert_eq!(c.get_key().unwrap(), Key::Str("table:alpha".to_string()));
        assert_eq!(
            c.get_value().unwrap(),
            Value::Str("key_format=S,value_format=S".to_string())
        );
        assert!(c.next().unwrap());
        assert_eq!(c.get_key().unwrap(), Key::Str("table:beta".to_string()));
        assert!(!c.next().unwrap());
        conn.close().unwrap();
    }

    #[test]
    fn test_statistics_cursor_counts_commits() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        put(&session, "table:t", "a", "1").unwrap();
        session.begin_transaction("").unwrap();
        put(&session, "table:t", "b", "2").unwrap();
        session.commit_transaction("").unwrap();

        let mut c = session.open_cursor("statistics:", "").unwrap();
        c.set_key(Key::Str("txn_commits".to_string()));
        assert!(c.search().unwrap());
        assert_eq!(c.get_value().unwrap(), Value::Int(2));

        let mut tc = session.open_cursor("statistics:table:t", "").unwrap();
        tc.set_key(Key::Str("entries".to_string()));
        assert!(tc.search().unwrap());
        assert_eq!(tc.get_value().unwrap(), Value::Int(2));
        conn.close().unwrap();
    }

    #[test]
    fn test_file_uri_maps_to_table() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        put(&session, "table:t", "a", "1").unwrap();

        assert_eq!(get(&session, "file:t.wt", "a").unwrap(), Some("1".to_string()));
        assert!(session.open_cursor("file:nope", "").is_err());
        conn.close().unwrap();
    }

    #[test]
    fn test_fixed_bits_removed_cell_reads_zero() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        session
            .create("table:flcs", "key_format=r,value_format=8t")
            .unwrap();

        let mut c = session.open_cursor("table:flcs", "").unwrap();
        c.set_key(Key::Record(1));
        c.set_value(Value::Bits(7));
        c.insert().unwrap();
        c.set_key(Key::Record(1));
        c.remove().unwrap();

        c.set_key(Key::Record(1));
        assert!(c.search().unwrap());
        assert_eq!(c.get_value().unwrap(), Value::Bits(0));
        conn.close().unwrap();
    }

    // ---------------------------------------------------------------
    // Durability
    // ---------------------------------------------------------------

    #[test]
    fn test_checkpoint_and_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        put(&session, "table:t", "a", "1").unwrap();
        session.checkpoint("").unwrap();
        put(&session, "table:t", "b", "2").unwrap();
        drop(session);
        // close() takes a final checkpoint, so "b" survives too.
        conn.close().unwrap();

        let conn = Connection::open(dir.path(), "").unwrap();
        let session = conn.open_session().unwrap();
        assert_eq!(get(&session, "table:t", "a").unwrap(), Some("1".to_string()));
        assert_eq!(get(&session, "table:t", "b").unwrap(), Some("2".to_string()));
        conn.close().unwrap();
    }

    #[test]
    fn test_crash_recovery_replays_log() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("db"), "create,log=(enabled=true)").unwrap();
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        session.checkpoint("").unwrap();
        put(&session, "table:t", "a", "1").unwrap();
        put(&session, "table:t", "b", "2").unwrap();

        // Simulate a crash: copy the durable files without closing.
        let crashed = dir.path().join("crashed");
        fs::create_dir_all(&crashed).unwrap();
        for entry in fs::read_dir(dir.path().join("db")).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !crate::layout::is_runtime_file(&name) {
                fs::copy(entry.path(), crashed.join(&name)).unwrap();
            }
        }

        let recovered = Connection::open(&crashed, "log=(enabled=true)").unwrap();
        let rsession = recovered.open_session().unwrap();
        assert_eq!(get(&rsession, "table:t", "a").unwrap(), Some("1".to_string()));
        assert_eq!(get(&rsession, "table:t", "b").unwrap(), Some("2".to_string()));
        recovered.close().unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_rollback_to_stable_end_to_end() {
        let dir = TempDir::new().unwrap();
        let conn = open(&dir);
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        conn.set_timestamp("oldest_timestamp=1").unwrap();

        for (value, ts) in [("keep", "a"), ("strip", "14")] {
            session.begin_transaction("").unwrap();
            put(&session, "table:t", "k", value).unwrap();
            session
                .commit_transaction(&format!("commit_timestamp={}", ts))
                .unwrap();
        }
        conn.set_timestamp("stable_timestamp=f").unwrap();

        // Busy while a transaction is active.
        session.begin_transaction("").unwrap();
        assert!(conn.rollback_to_stable("").unwrap_err().is_busy());
        session.rollback_transaction("").unwrap();

        assert_eq!(conn.rollback_to_stable("dryrun=true").unwrap(), 1);
        assert_eq!(conn.rollback_to_stable("").unwrap(), 1);

        session.begin_transaction("read_timestamp=14").unwrap();
        assert_eq!(get(&session, "table:t", "k").unwrap(), Some("keep".to_string()));
        session.rollback_transaction("").unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_rollback_to_stable_exempts_logged_tables() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create,log=(enabled=true)").unwrap();
        let session = conn.open_session().unwrap();
        session
            .create("table:logged", "key_format=S,value_format=S")
            .unwrap();
        session
            .create(
                "table:unlogged",
                "key_format=S,value_format=S,log=(enabled=false)",
            )
            .unwrap();
        conn.set_timestamp("oldest_timestamp=1").unwrap();

        for uri in ["table:logged", "table:unlogged"] {
            session.begin_transaction("").unwrap();
            put(&session, uri, "k", "v").unwrap();
            session.commit_transaction("commit_timestamp=14").unwrap();
        }
        conn.set_timestamp("stable_timestamp=5").unwrap();
        conn.rollback_to_stable("").unwrap();

        assert_eq!(get(&session, "table:logged", "k").unwrap(), Some("v".to_string()));
        assert_eq!(get(&session, "table:unlogged", "k").unwrap(), None);
        conn.close().unwrap();
    }

    #[test]
    fn test_log_cursor_lists_records() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create,log=(enabled=true)").unwrap();
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        put(&session, "table:t", "a", "1").unwrap();
        put(&session, "table:t", "b", "2").unwrap();

        let mut c = session.open_cursor("log:", "").unwrap();
        let mut count = 0;
        while c.next().unwrap() {
            count += 1;
        }
        assert_eq!(count, 2);
        conn.close().unwrap();

        let unlogged_dir = TempDir::new().unwrap();
        let conn = Connection::open(unlogged_dir.path(), "create").unwrap();
        let session = conn.open_session().unwrap();
        assert!(session.open_cursor("log:", "").is_err());
        conn.close().unwrap();
    }

    #[test]
    fn test_in_memory_connection_data_path() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create,in_memory=true").unwrap();
        let session = conn.open_session().unwrap();
        str_table(&session, "t");
        put(&session, "table:t", "a", "1").unwrap();
        assert_eq!(get(&session, "table:t", "a").unwrap(), Some("1".to_string()));
        session.checkpoint("").unwrap();
        conn.close().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
