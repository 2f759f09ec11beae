//! Transaction state and read views

use wiredtest_core::{Error, Key, Result, Timestamp};

use crate::log::LogOp;

/// Isolation level of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Reads see the commit state as of transaction begin.
    #[default]
    Snapshot,
    /// Reads see the commit state as of each operation.
    ReadCommitted,
    /// Reads see uncommitted updates.
    ReadUncommitted,
}

impl Isolation {
    /// Parse the engine's isolation configuration value.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "snapshot" => Ok(Isolation::Snapshot),
            "read-committed" => Ok(Isolation::ReadCommitted),
            "read-uncommitted" => Ok(Isolation::ReadUncommitted),
            other => Err(Error::InvalidArgument(format!(
                "unknown isolation level: {}",
                other
            ))),
        }
    }
}

/// Everything a read needs to decide version visibility
#[derive(Debug, Clone, Copy)]
pub struct ReadView {
    /// The reading transaction's id, `None` for autocommit reads
    pub txn_id: Option<u64>,
    /// Commit sequence the snapshot was taken at; commits with a greater
    /// sequence are invisible under snapshot isolation
    pub snapshot_seq: u64,
    /// Read timestamp, `Timestamp::NONE` for untimestamped reads
    pub read_ts: Timestamp,
    /// Isolation level
    pub isolation: Isolation,
    /// Skip prepared updates instead of reporting a conflict
    pub ignore_prepare: bool,
}

impl ReadView {
    /// An untimestamped autocommit view at `snapshot_seq`.
    pub fn autocommit(snapshot_seq: u64) -> Self {
        ReadView {
            txn_id: None,
            snapshot_seq,
            read_ts: Timestamp::NONE,
            isolation: Isolation::Snapshot,
            ignore_prepare: false,
        }
    }
}

/// Lifecycle phase of a running transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnPhase {
    /// Begun, not yet prepared or resolved
    Running,
    /// Prepared at the given timestamp, awaiting commit or rollback
    Prepared {
        /// Timestamp declared at prepare
        prepare_ts: Timestamp,
    },
}

/// Per-session state of one running transaction
#[derive(Debug)]
pub struct TxnState {
    /// Transaction id, unique per connection
    pub id: u64,
    /// Commit sequence at begin
    pub snapshot_seq: u64,
    /// Isolation level fixed at begin
    pub isolation: Isolation,
    /// Read timestamp, unset until configured
    pub read_ts: Timestamp,
    /// Skip prepared updates on read
    pub ignore_prepare: bool,
    /// Commit timestamp staged by `timestamp_transaction` or commit config
    pub commit_ts: Timestamp,
    /// Durable timestamp staged by `timestamp_transaction` or commit config
    pub durable_ts: Timestamp,
    /// Prepare timestamp staged ahead of `prepare_transaction`
    pub prepare_ts: Timestamp,
    /// The transaction promised at begin to stay untimestamped
    pub no_timestamp: bool,
    /// Optional prepared-transaction id supplied at prepare
    pub prepared_id: Option<u64>,
    /// Optional transaction name from begin config
    pub name: Option<String>,
    /// Current phase
    pub phase: TxnPhase,
    /// Tables and keys written, in first-write order
    pub writes: Vec<(String, Key)>,
    /// Operations against logged tables, in execution order
    pub ops: Vec<LogOp>,
}

impl TxnState {
    /// A fresh running transaction.
    pub fn new(id: u64, snapshot_seq: u64, isolation: Isolation) -> Self {
        TxnState {
            id,
            snapshot_seq,
            isolation,
            read_ts: Timestamp::NONE,
            ignore_prepare: false,
            commit_ts: Timestamp::NONE,
            durable_ts: Timestamp::NONE,
            prepare_ts: Timestamp::NONE,
            no_timestamp: false,
            prepared_id: None,
            name: None,
            phase: TxnPhase::Running,
            writes: Vec::new(),
            ops: Vec::new(),
        }
    }

    /// The view reads inside this transaction use at `current_seq`.
    pub fn view(&self, current_seq: u64) -> ReadView {
        let snapshot_seq = match self.isolation {
            Isolation::Snapshot => self.snapshot_seq,
            Isolation::ReadCommitted | Isolation::ReadUncommitted => current_seq,
        };
        ReadView {
            txn_id: Some(self.id),
            snapshot_seq,
            read_ts: self.read_ts,
            isolation: self.isolation,
            ignore_prepare: self.ignore_prepare,
        }
    }

    /// Record a write target once, preserving first-write order.
    pub fn record_write(&mut self, table: &str, key: &Key) {
        if !self
            .writes
            .iter()
            .any(|(t, k)| t == table && k == key)
        {
            self.writes.push((table.to_string(), key.clone()));
        }
    }

    /// True once `prepare_transaction` has run.
    pub fn is_prepared(&self) -> bool {
        matches!(self.phase, TxnPhase::Prepared { .. })
    }
}
