//! Connection statistics counters
//!
//! Counters are plain atomics bumped at the relevant points; the
//! `statistics:` cursor renders a sorted snapshot of them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained for the lifetime of a connection
#[derive(Debug, Default)]
pub struct Stats {
    /// Committed transactions (including autocommit operations)
    pub txn_commits: AtomicU64,
    /// Rolled-back transactions
    pub txn_rollbacks: AtomicU64,
    /// Prepared transactions
    pub txn_prepares: AtomicU64,
    /// Checkpoints completed
    pub checkpoints: AtomicU64,
    /// Log records written
    pub log_records: AtomicU64,
    /// Log records applied during recovery
    pub recovery_records: AtomicU64,
    /// Versions discarded by rollback-to-stable
    pub rts_discarded: AtomicU64,
}

impl Stats {
    /// Fresh counters, all zero.
    pub fn new() -> Self {
        Stats::default()
    }

    /// Bump a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot every counter, sorted by name.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let mut out = vec![
            ("checkpoints", self.checkpoints.load(Ordering::Relaxed)),
            ("log_records", self.log_records.load(Ordering::Relaxed)),
            (
                "recovery_records",
                self.recovery_records.load(Ordering::Relaxed),
            ),
            ("rts_discarded", self.rts_discarded.load(Ordering::Relaxed)),
            ("txn_commits", self.txn_commits.load(Ordering::Relaxed)),
            ("txn_prepares", self.txn_prepares.load(Ordering::Relaxed)),
            ("txn_rollbacks", self.txn_rollbacks.load(Ordering::Relaxed)),
        ];
        out.sort_by_key(|(name, _)| *name);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_sorted_and_counted() {
        let stats = Stats::new();
        Stats::bump(&stats.txn_commits);
        Stats::bump(&stats.txn_commits);
        Stats::add(&stats.log_records, 5);

        let snap = stats.snapshot();
        assert!(snap.windows(2).all(|w| w[0].0 < w[1].0));
        let get = |name: &str| snap.iter().find(|(n, _)| *n == name).unwrap().1;
        assert_eq!(get("txn_commits"), 2);
        assert_eq!(get("log_records"), 5);
        assert_eq!(get("checkpoints"), 0);
    }
}
