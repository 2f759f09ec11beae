//! MVCC table storage
//!
//! Each table holds a btree of version chains. A chain is ordered oldest to
//! newest; readers walk it newest-first and take the first version their
//! view admits. Writers append uncommitted versions and the owning session
//! resolves them at commit, prepare, or rollback.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use wiredtest_core::{Error, FormatType, Key, Result, Timestamp, Value};

use crate::txn::{Isolation, ReadView};

/// Commit state of one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionState {
    /// Written by a transaction that has neither prepared nor resolved
    Uncommitted {
        /// Writing transaction
        txn_id: u64,
    },
    /// Written by a prepared transaction awaiting resolution
    Prepared {
        /// Writing transaction
        txn_id: u64,
        /// Timestamp declared at prepare
        prepare_ts: Timestamp,
    },
    /// Committed and visible subject to sequence and timestamp checks
    Committed {
        /// Commit sequence, zero for recovered versions
        seq: u64,
        /// Commit timestamp, unset for untimestamped commits
        commit_ts: Timestamp,
        /// Durable timestamp, unset for untimestamped commits
        durable_ts: Timestamp,
    },
}

/// One version in a chain; `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionEntry {
    /// Commit state
    pub state: VersionState,
    /// The value, or `None` for a removal
    pub value: Option<Value>,
}

/// One row of a checkpoint snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    /// Row key
    pub key: Key,
    /// Committed value at checkpoint time
    pub value: Value,
    /// Commit timestamp of that value
    pub commit_ts: Timestamp,
    /// Durable timestamp of that value
    pub durable_ts: Timestamp,
}

/// Decide whether `entry` is visible under `view`.
///
/// `Ok(true)` means take this version, `Ok(false)` means keep walking to an
/// older one. Prepared versions belonging to another transaction produce
/// `PrepareConflict` when the view's read timestamp has reached the prepare
/// timestamp, unless the view ignores prepared updates.
fn admits(entry: &VersionEntry, view: &ReadView) -> Result<bool> {
    match entry.state {
        VersionState::Uncommitted { txn_id } => Ok(view.txn_id == Some(txn_id)
            || view.isolation == Isolation::ReadUncommitted),
        VersionState::Prepared { txn_id, prepare_ts } => {
            if view.txn_id == Some(txn_id) {
                return Ok(true);
            }
            if view.read_ts.is_set() && view.read_ts >= prepare_ts {
                if view.ignore_prepare {
                    return Ok(false);
                }
                return Err(Error::PrepareConflict);
            }
            Ok(false)
        }
        VersionState::Committed { seq, commit_ts, .. } => {
            if view.isolation == Isolation::Snapshot && seq > view.snapshot_seq {
                return Ok(false);
            }
            if view.read_ts.is_set() && commit_ts.is_set() && commit_ts > view.read_ts {
                return Ok(false);
            }
            Ok(true)
        }
    }
}

fn visible<'a>(chain: &'a [VersionEntry], view: &ReadView) -> Result<Option<&'a VersionEntry>> {
    for entry in chain.iter().rev() {
        if admits(entry, view)? {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

/// A single table: fixed formats plus MVCC version chains
#[derive(Debug)]
pub struct Table {
    name: String,
    key_format: FormatType,
    value_format: FormatType,
    logged: bool,
    create_config: String,
    rows: RwLock<BTreeMap<Key, Vec<VersionEntry>>>,
    open_cursors: AtomicUsize,
}

impl Table {
    /// Create an empty table.
    pub fn new(
        name: &str,
        key_format: FormatType,
        value_format: FormatType,
        logged: bool,
        create_config: &str,
    ) -> Self {
        Table {
            name: name.to_string(),
            key_format,
            value_format,
            logged,
            create_config: create_config.to_string(),
            rows: RwLock::new(BTreeMap::new()),
            open_cursors: AtomicUsize::new(0),
        }
    }

    /// Table name without the `table:` prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared key format.
    pub fn key_format(&self) -> FormatType {
        self.key_format
    }

    /// Declared value format.
    pub fn value_format(&self) -> FormatType {
        self.value_format
    }

    /// True when updates to this table are logged (and exempt from
    /// rollback-to-stable).
    pub fn logged(&self) -> bool {
        self.logged
    }

    /// The configuration string the table was created with.
    pub fn create_config(&self) -> &str {
        &self.create_config
    }

    /// Read the visible value for `key` under `view`.
    ///
    /// Fixed bit-field tables report removed cells as zero instead of a
    /// miss; every other format reports `None`.
    pub fn read(&self, key: &Key, view: &ReadView) -> Result<Option<Value>> {
        let rows = self.rows.read();
        let Some(chain) = rows.get(key) else {
            return Ok(None);
        };
        match visible(chain, view)? {
            Some(entry) => match &entry.value {
                Some(v) => Ok(Some(v.clone())),
                None => Ok(self.value_format.removed_cell_value()),
            },
            None => Ok(None),
        }
    }

    /// Write `value` (or a tombstone) for `key` on behalf of `txn_id`.
    ///
    /// # Errors
    /// `Rollback` when the newest version belongs to another unresolved
    /// transaction, or committed after this transaction's snapshot under
    /// snapshot isolation.
    pub fn put(
        &self,
        txn_id: u64,
        view: &ReadView,
        key: Key,
        value: Option<Value>,
    ) -> Result<()> {
        let mut rows = self.rows.write();
        let chain = rows.entry(key).or_default();
        if let Some(newest) = chain.last_mut() {
            match newest.state {
                VersionState::Uncommitted { txn_id: owner }
                | VersionState::Prepared { txn_id: owner, .. } => {
                    if owner == txn_id {
                        newest.value = value;
                        return Ok(());
                    }
                    return Err(Error::Rollback {
                        reason: "conflict between concurrent operations".to_string(),
                    });
                }
                VersionState::Committed { seq, .. } => {
                    if view.isolation == Isolation::Snapshot && seq > view.snapshot_seq {
                        return Err(Error::Rollback {
                            reason: "conflict between concurrent operations".to_string(),
                        });
                    }
                }
            }
        }
        chain.push(VersionEntry {
            state: VersionState::Uncommitted { txn_id },
            value,
        });
        Ok(())
    }

    /// The first visible (key, value) strictly after `after`, or the first
    /// overall when `after` is `None`.
    pub fn next_visible(
        &self,
        after: Option<&Key>,
        view: &ReadView,
    ) -> Result<Option<(Key, Value)>> {
        let rows = self.rows.read();
        let lower = match after {
            Some(k) => Bound::Excluded(k.clone()),
            None => Bound::Unbounded,
        };
        for (key, chain) in rows.range((lower, Bound::Unbounded)) {
            if let Some(entry) = visible(chain, view)? {
                match &entry.value {
                    Some(v) => return Ok(Some((key.clone(), v.clone()))),
                    None => {
                        if let Some(zero) = self.value_format.removed_cell_value() {
                            return Ok(Some((key.clone(), zero)));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// The last visible (key, value) strictly before `before`, or the last
    /// overall when `before` is `None`.
    pub fn prev_visible(
        &self,
        before: Option<&Key>,
        view: &ReadView,
    ) -> Result<Option<(Key, Value)>> {
        let rows = self.rows.read();
        let upper = match before {
            Some(k) => Bound::Excluded(k.clone()),
            None => Bound::Unbounded,
        };
        for (key, chain) in rows.range((Bound::Unbounded, upper)).rev() {
            if let Some(entry) = visible(chain, view)? {
                match &entry.value {
                    Some(v) => return Ok(Some((key.clone(), v.clone()))),
                    None => {
                        if let Some(zero) = self.value_format.removed_cell_value() {
                            return Ok(Some((key.clone(), zero)));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Mark `txn_id`'s version of `key` committed.
    pub fn commit_key(
        &self,
        key: &Key,
        txn_id: u64,
        seq: u64,
        commit_ts: Timestamp,
        durable_ts: Timestamp,
    ) {
        let mut rows = self.rows.write();
        if let Some(chain) = rows.get_mut(key) {
            for entry in chain.iter_mut() {
                let owned = matches!(
                    entry.state,
                    VersionState::Uncommitted { txn_id: o } | VersionState::Prepared { txn_id: o, .. }
                        if o == txn_id
                );
                if owned {
                    entry.state = VersionState::Committed {
                        seq,
                        commit_ts,
                        durable_ts,
                    };
                }
            }
        }
    }

    /// Mark `txn_id`'s version of `key` prepared at `prepare_ts`.
    pub fn prepare_key(&self, key: &Key, txn_id: u64, prepare_ts: Timestamp) {
        let mut rows = self.rows.write();
        if let Some(chain) = rows.get_mut(key) {
            for entry in chain.iter_mut() {
                if matches!(entry.state, VersionState::Uncommitted { txn_id: o } if o == txn_id) {
                    entry.state = VersionState::Prepared { txn_id, prepare_ts };
                }
            }
        }
    }

    /// Discard `txn_id`'s version of `key`.
    pub fn rollback_key(&self, key: &Key, txn_id: u64) {
        let mut rows = self.rows.write();
        if let Some(chain) = rows.get_mut(key) {
            chain.retain(|entry| {
                !matches!(
                    entry.state,
                    VersionState::Uncommitted { txn_id: o } | VersionState::Prepared { txn_id: o, .. }
                        if o == txn_id
                )
            });
            if chain.is_empty() {
                rows.remove(key);
            }
        }
    }

    /// Discard committed versions with a commit timestamp newer than
    /// `stable`. Returns the number of versions discarded.
    pub fn rollback_to_stable(&self, stable: Timestamp) -> usize {
        let mut rows = self.rows.write();
        let mut discarded = 0;
        rows.retain(|_, chain| {
            chain.retain(|entry| {
                let keep = !matches!(
                    entry.state,
                    VersionState::Committed { commit_ts, .. }
                        if commit_ts.is_set() && commit_ts > stable
                );
                if !keep {
                    discarded += 1;
                }
                keep
            });
            !chain.is_empty()
        });
        discarded
    }

    /// Count versions a rollback-to-stable would discard, without touching
    /// anything.
    pub fn rollback_to_stable_dryrun(&self, stable: Timestamp) -> usize {
        let rows = self.rows.read();
        rows.values()
            .flat_map(|chain| chain.iter())
            .filter(|entry| {
                matches!(
                    entry.state,
                    VersionState::Committed { commit_ts, .. }
                        if commit_ts.is_set() && commit_ts > stable
                )
            })
            .count()
    }

    /// Materialize the newest committed state of every key for a checkpoint.
    ///
    /// With `precise` set, versions committed after the stable timestamp are
    /// skipped in favor of older ones. Tombstones drop the key, except on
    /// fixed bit-field tables where the cell persists as zero.
    pub fn checkpoint_rows(&self, precise: Option<Timestamp>) -> Vec<SnapshotRow> {
        let rows = self.rows.read();
        let mut out = Vec::new();
        for (key, chain) in rows.iter() {
            let committed = chain.iter().rev().find_map(|entry| match entry.state {
                VersionState::Committed {
                    commit_ts,
                    durable_ts,
                    ..
                } => {
                    if let Some(stable) = precise {
                        if commit_ts.is_set() && commit_ts > stable {
                            return None;
                        }
                    }
                    Some((entry.value.clone(), commit_ts, durable_ts))
                }
                _ => None,
            });
            if let Some((value, commit_ts, durable_ts)) = committed {
                let value = match value {
                    Some(v) => Some(v),
                    None => self.value_format.removed_cell_value(),
                };
                if let Some(value) = value {
                    out.push(SnapshotRow {
                        key: key.clone(),
                        value,
                        commit_ts,
                        durable_ts,
                    });
                }
            }
        }
        out
    }

    /// Install checkpoint rows as the base committed state.
    pub fn install_snapshot(&self, snapshot: Vec<SnapshotRow>) {
        let mut rows = self.rows.write();
        for row in snapshot {
            rows.insert(
                row.key,
                vec![VersionEntry {
                    state: VersionState::Committed {
                        seq: 0,
                        commit_ts: row.commit_ts,
                        durable_ts: row.durable_ts,
                    },
                    value: Some(row.value),
                }],
            );
        }
    }

    /// Apply one replayed log operation as committed base state.
    pub fn apply_logged(
        &self,
        key: Key,
        value: Option<Value>,
        commit_ts: Timestamp,
        durable_ts: Timestamp,
    ) {
        let mut rows = self.rows.write();
        rows.entry(key).or_default().push(VersionEntry {
            state: VersionState::Committed {
                seq: 0,
                commit_ts,
                durable_ts,
            },
            value,
        });
    }

    /// Number of keys with a currently visible value.
    pub fn entry_count(&self) -> usize {
        let view = ReadView::autocommit(u64::MAX);
        let rows = self.rows.read();
        rows.values()
            .filter(|chain| {
                matches!(visible(chain, &view), Ok(Some(entry))
                    if entry.value.is_some() || self.value_format.removed_cell_value().is_some())
            })
            .count()
    }

    /// Register an open cursor on this table.
    pub fn cursor_opened(&self) {
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
    }

    /// Unregister an open cursor.
    pub fn cursor_closed(&self) {
        self.open_cursors.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of cursors currently open on this table.
    pub fn open_cursor_count(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::TxnState;

    fn table() -> Table {
        Table::new(
            "t",
            FormatType::parse("S").unwrap(),
            FormatType::parse("S").unwrap(),
            false,
            "key_format=S,value_format=S",
        )
    }

    fn commit(t: &Table, txn: &TxnState, seq: u64, ts: u64) {
        for (_, key) in &txn.writes {
            t.commit_key(key, txn.id, seq, Timestamp::new(ts), Timestamp::new(ts));
        }
    }

    fn k(s: &str) -> Key {
        Key::Str(s.to_string())
    }

    fn v(s: &str) -> Value {
        Value::Str(s.to_string())
    }

    #[test]
    fn test_read_own_uncommitted_write() {
        let t = table();
        let mut txn = TxnState::new(1, 0, Isolation::Snapshot);
        t.put(txn.id, &txn.view(0), k("a"), Some(v("1"))).unwrap();
        txn.record_write("t", &k("a"));

        // Visible to the writer, invisible to a later autocommit reader.
        assert_eq!(t.read(&k("a"), &txn.view(0)).unwrap(), Some(v("1")));
        assert_eq!(t.read(&k("a"), &ReadView::autocommit(10)).unwrap(), None);
    }

    #[test]
    fn test_snapshot_isolation_hides_later_commits() {
        let t = table();
        let mut writer = TxnState::new(1, 0, Isolation::Snapshot);
        t.put(writer.id, &writer.view(0), k("a"), Some(v("1"))).unwrap();
        writer.record_write("t", &k("a"));
        commit(&t, &writer, 5, 0);

        assert_eq!(t.read(&k("a"), &ReadView::autocommit(4)).unwrap(), None);
        assert_eq!(t.read(&k("a"), &ReadView::autocommit(5)).unwrap(), Some(v("1")));
    }

    #[test]
    fn test_timestamp_visibility() {
        let t = table();
        for (val, seq, ts) in [("a", 1, 10u64), ("b", 2, 20)] {
            let mut txn = TxnState::new(seq, seq - 1, Isolation::Snapshot);
            t.put(txn.id, &txn.view(seq - 1), k("key"), Some(v(val))).unwrap();
            txn.record_write("t", &k("key"));
            commit(&t, &txn, seq, ts);
        }

        let mut view = ReadView::autocommit(100);
        view.read_ts = Timestamp::new(12);
        assert_eq!(t.read(&k("key"), &view).unwrap(), Some(v("a")));
        view.read_ts = Timestamp::new(25);
        assert_eq!(t.read(&k("key"), &view).unwrap(), Some(v("b")));
        view.read_ts = Timestamp::new(5);
        assert_eq!(t.read(&k("key"), &view).unwrap(), None);
    }

    #[test]
    fn test_write_conflict_on_uncommitted() {
        let t = table();
        let t1 = TxnState::new(1, 0, Isolation::Snapshot);
        let t2 = TxnState::new(2, 0, Isolation::Snapshot);
        t.put(t1.id, &t1.view(0), k("a"), Some(v("1"))).unwrap();
        let err = t.put(t2.id, &t2.view(0), k("a"), Some(v("2"))).unwrap_err();
        assert!(err.is_rollback());
    }

    #[test]
    fn test_write_conflict_on_concurrent_commit() {
        let t = table();
        let mut t1 = TxnState::new(1, 0, Isolation::Snapshot);
        let t2 = TxnState::new(2, 0, Isolation::Snapshot);
        t.put(t1.id, &t1.view(0), k("a"), Some(v("1"))).unwrap();
        t1.record_write("t", &k("a"));
        commit(&t, &t1, 1, 0);

        // t2 began before t1 committed, so its write must fail.
        let err = t.put(t2.id, &t2.view(0), k("a"), Some(v("2"))).unwrap_err();
        assert!(err.is_rollback());
    }

    #[test]
    fn test_prepared_conflict_and_ignore() {
        let t = table();
        let mut base = TxnState::new(1, 0, Isolation::Snapshot);
        t.put(base.id, &base.view(0), k("a"), Some(v("old"))).unwrap();
        base.record_write("t", &k("a"));
        commit(&t, &base, 1, 10);

        let mut preparer = TxnState::new(2, 1, Isolation::Snapshot);
        t.put(preparer.id, &preparer.view(1), k("a"), Some(v("new"))).unwrap();
        preparer.record_write("t", &k("a"));
        t.prepare_key(&k("a"), preparer.id, Timestamp::new(20));

        let mut view = ReadView::autocommit(10);
        view.read_ts = Timestamp::new(25);
        let err = t.read(&k("a"), &view).unwrap_err();
        assert!(err.is_prepare_conflict());

        view.ignore_prepare = true;
        assert_eq!(t.read(&k("a"), &view).unwrap(), Some(v("old")));

        // A reader below the prepare timestamp sees the old value.
        view.ignore_prepare = false;
        view.read_ts = Timestamp::new(15);
        assert_eq!(t.read(&k("a"), &view).unwrap(), Some(v("old")));
    }

    #[test]
    fn test_rollback_key_discards() {
        let t = table();
        let txn = TxnState::new(1, 0, Isolation::Snapshot);
        t.put(txn.id, &txn.view(0), k("a"), Some(v("1"))).unwrap();
        t.rollback_key(&k("a"), txn.id);
        assert_eq!(t.read(&k("a"), &ReadView::autocommit(u64::MAX)).unwrap(), None);
        assert_eq!(t.entry_count(), 0);
    }

    #[test]
    fn test_rollback_to_stable_strips_newer_commits() {
        let t = table();
        for (val, seq, ts) in [("a", 1, 10u64), ("b", 2, 20)] {
            let mut txn = TxnState::new(seq, seq - 1, Isolation::Snapshot);
            t.put(txn.id, &txn.view(seq - 1), k("key"), Some(v(val))).unwrap();
            txn.record_write("t", &k("key"));
            commit(&t, &txn, seq, ts);
        }

        assert_eq!(t.rollback_to_stable_dryrun(Timestamp::new(15)), 1);
        assert_eq!(t.rollback_to_stable(Timestamp::new(15)), 1);
        let mut view = ReadView::autocommit(u64::MAX);
        view.read_ts = Timestamp::new(25);
        assert_eq!(t.read(&k("key"), &view).unwrap(), Some(v("a")));

        // Below stable=5 both versions go and the key disappears.
        assert_eq!(t.rollback_to_stable(Timestamp::new(5)), 1);
        assert_eq!(t.read(&k("key"), &ReadView::autocommit(u64::MAX)).unwrap(), None);
    }

    #[test]
    fn test_fixed_bits_removed_cell_reads_zero() {
        let t = Table::new(
            "flcs",
            FormatType::parse("r").unwrap(),
            FormatType::parse("8t").unwrap(),
            false,
            "key_format=r,value_format=8t",
        );
        let mut txn = TxnState::new(1, 0, Isolation::Snapshot);
        t.put(txn.id, &txn.view(0), Key::Record(1), Some(Value::Bits(7))).unwrap();
        txn.record_write("flcs", &Key::Record(1));
        commit(&t, &txn, 1, 0);

        let mut remover = TxnState::new(2, 1, Isolation::Snapshot);
        t.put(remover.id, &remover.view(1), Key::Record(1), None).unwrap();
        remover.record_write("flcs", &Key::Record(1));
        commit(&t, &remover, 2, 0);

        let view = ReadView::autocommit(u64::MAX);
        assert_eq!(t.read(&Key::Record(1), &view).unwrap(), Some(Value::Bits(0)));
        assert_eq!(
            t.next_visible(None, &view).unwrap(),
            Some((Key::Record(1), Value::Bits(0)))
        );
    }

    #[test]
    fn test_next_prev_visible_order() {
        let t = table();
        let mut txn = TxnState::new(1, 0, Isolation::Snapshot);
        for key in ["b", "a", "c"] {
            t.put(txn.id, &txn.view(0), k(key), Some(v(key))).unwrap();
            txn.record_write("t", &k(key));
        }
        commit(&t, &txn, 1, 0);

        let view = ReadView::autocommit(u64::MAX);
        let (first, _) = t.next_visible(None, &view).unwrap().unwrap();
        assert_eq!(first, k("a"));
        let (second, _) = t.next_visible(Some(&k("a")), &view).unwrap().unwrap();
        assert_eq!(second, k("b"));
        let (last, _) = t.prev_visible(None, &view).unwrap().unwrap();
        assert_eq!(last, k("c"));
        assert!(t.next_visible(Some(&k("c")), &view).unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_rows_precise() {
        let t = table();
        for (val, seq, ts) in [("a", 1, 10u64), ("b", 2, 20)] {
            let mut txn = TxnState::new(seq, seq - 1, Isolation::Snapshot);
            t.put(txn.id, &txn.view(seq - 1), k("key"), Some(v(val))).unwrap();
            txn.record_write("t", &k("key"));
            commit(&t, &txn, seq, ts);
        }

        let fuzzy = t.checkpoint_rows(None);
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].value, v("b"));

        let precise = t.checkpoint_rows(Some(Timestamp::new(15)));
        assert_eq!(precise.len(), 1);
        assert_eq!(precise[0].value, v("a"));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let t = table();
        let mut txn = TxnState::new(1, 0, Isolation::Snapshot);
        t.put(txn.id, &txn.view(0), k("a"), Some(v("1"))).unwrap();
        txn.record_write("t", &k("a"));
        commit(&t, &txn, 1, 10);

        let rows = t.checkpoint_rows(None);
        let restored = table();
        restored.install_snapshot(rows);
        let mut view = ReadView::autocommit(u64::MAX);
        view.read_ts = Timestamp::new(10);
        assert_eq!(restored.read(&k("a"), &view).unwrap(), Some(v("1")));
    }
}
