//! Scoped transactions and the timestamped cursor proxy
//!
//! Tests that do not care about specific timestamp values still need
//! monotonic commit timestamps. [`with_transaction`] wraps a block in
//! begin/commit with a clock-assigned commit timestamp and rolls back on
//! any error; [`TimestampedCursor`] gives every bare mutation the same
//! treatment without changing the call sites.

use wiredtest_core::{Key, Result, TimestampClock, Value};
use wiredtest_engine::{Cursor, Modify, Session};

/// Run `body` inside a transaction committed at the clock's next timestamp.
///
/// An error from the body rolls the transaction back and propagates; an
/// error from the commit itself (the engine has already rolled back by
/// then) propagates too. Rollbacks are never retried here.
pub fn with_transaction<T>(
    session: &Session,
    clock: &TimestampClock,
    body: impl FnOnce(&Session) -> Result<T>,
) -> Result<T> {
    with_transaction_config(session, clock, "", body)
}

/// [`with_transaction`] with an explicit `begin_transaction` configuration.
pub fn with_transaction_config<T>(
    session: &Session,
    clock: &TimestampClock,
    begin_config: &str,
    body: impl FnOnce(&Session) -> Result<T>,
) -> Result<T> {
    session.begin_transaction(begin_config)?;
    let value = match body(session) {
        Ok(value) => value,
        Err(e) => {
            // Rollback errors lose to the body's error.
            let _ = session.rollback_transaction("");
            return Err(e);
        }
    };
    session.commit_transaction(&format!("commit_timestamp={}", clock.next()))?;
    Ok(value)
}

/// A cursor proxy that timestamps every mutation
///
/// Outside a transaction, each `insert`/`update`/`remove`/`modify` runs in
/// its own transaction committed at the clock's next timestamp. Inside one,
/// the mutation executes as-is and the running transaction's commit
/// timestamp is restamped, so the surrounding commit stays monotonic.
/// Reads pass straight through.
#[derive(Debug)]
pub struct TimestampedCursor<'a, C> {
    inner: C,
    session: &'a Session,
    clock: &'a TimestampClock,
}

impl<'a, C: Cursor> TimestampedCursor<'a, C> {
    /// Wrap `inner` so its mutations commit at `clock` timestamps.
    pub fn new(inner: C, session: &'a Session, clock: &'a TimestampClock) -> Self {
        TimestampedCursor {
            inner,
            session,
            clock,
        }
    }

    /// Unwrap, returning the underlying cursor.
    pub fn into_inner(self) -> C {
        self.inner
    }

    fn mutate(&mut self, op: impl FnOnce(&mut C) -> Result<()>) -> Result<()> {
        if self.session.in_transaction() {
            op(&mut self.inner)?;
            return self
                .session
                .timestamp_transaction(&format!("commit_timestamp={}", self.clock.next()));
        }
        self.session.begin_transaction("")?;
        if let Err(e) = op(&mut self.inner) {
            let _ = self.session.rollback_transaction("");
            return Err(e);
        }
        self.session
            .commit_transaction(&format!("commit_timestamp={}", self.clock.next()))
    }
}

impl<C: Cursor> Cursor for TimestampedCursor<'_, C> {
    fn set_key(&mut self, key: Key) {
        self.inner.set_key(key)
    }

    fn set_value(&mut self, value: Value) {
        self.inner.set_value(value)
    }

    fn get_key(&self) -> Result<Key> {
        self.inner.get_key()
    }

    fn get_value(&self) -> Result<Value> {
        self.inner.get_value()
    }

    fn search(&mut self) -> Result<bool> {
        self.inner.search()
    }

    fn insert(&mut self) -> Result<()> {
        self.mutate(|c| c.insert())
    }

    fn update(&mut self) -> Result<()> {
        self.mutate(|c| c.update())
    }

    fn remove(&mut self) -> Result<()> {
        self.mutate(|c| c.remove())
    }

    fn modify(&mut self, mods: &[Modify]) -> Result<()> {
        self.mutate(|c| c.modify(mods))
    }

    fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    fn prev(&mut self) -> Result<bool> {
        self.inner.prev()
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.reset()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn uri(&self) -> &str {
        self.inner.uri()
    }
}
