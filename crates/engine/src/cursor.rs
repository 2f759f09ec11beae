//! Cursors
//!
//! The [`Cursor`] trait is the narrow surface the harness programs against:
//! position with `set_key`, read with `search`/`next`/`prev`, write with
//! `insert`/`update`/`remove`/`modify`. Table cursors evaluate visibility
//! against the owning session's transaction on every call; auxiliary
//! cursors (`metadata:`, `statistics:`, `log:`) are read-only listings
//! materialized at open time.

use std::sync::Arc;

use wiredtest_core::{Error, Key, Result, Value};

use crate::session::SessionInner;
use crate::store::Table;

/// A byte-range edit applied by [`Cursor::modify`]
///
/// Replaces `size` bytes at `offset` of the current value with `data`;
/// the value grows or shrinks when `data.len() != size`. Offsets past the
/// end of the value are zero-padded first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modify {
    /// Replacement bytes
    pub data: Vec<u8>,
    /// Byte offset the edit starts at
    pub offset: usize,
    /// Number of bytes replaced
    pub size: usize,
}

impl Modify {
    /// A modify entry replacing `size` bytes at `offset` with `data`.
    pub fn new(data: impl Into<Vec<u8>>, offset: usize, size: usize) -> Self {
        Modify {
            data: data.into(),
            offset,
            size,
        }
    }

    fn apply_bytes(&self, bytes: &mut Vec<u8>) {
        if self.offset > bytes.len() {
            bytes.resize(self.offset, 0);
        }
        let end = (self.offset + self.size).min(bytes.len());
        bytes.splice(self.offset..end, self.data.iter().copied());
    }
}

/// Apply a sequence of modify entries to a string or byte value.
pub fn apply_modifies(value: &Value, mods: &[Modify]) -> Result<Value> {
    match value {
        Value::Str(s) => {
            let mut bytes = s.clone().into_bytes();
            for m in mods {
                m.apply_bytes(&mut bytes);
            }
            let s = String::from_utf8(bytes).map_err(|_| {
                Error::InvalidArgument("modify produced invalid UTF-8 in a string value".to_string())
            })?;
            Ok(Value::Str(s))
        }
        Value::Bytes(b) => {
            let mut bytes = b.clone();
            for m in mods {
                m.apply_bytes(&mut bytes);
            }
            Ok(Value::Bytes(bytes))
        }
        other => Err(Error::InvalidArgument(format!(
            "modify is not supported for value {:?}",
            other
        ))),
    }
}

/// The cursor operations the harness uses
///
/// `search`, `next`, and `prev` report misses as `Ok(false)` rather than an
/// error. Write operations on read-only cursors return `InvalidArgument`.
pub trait Cursor {
    /// Stage the key for the following operation.
    fn set_key(&mut self, key: Key);

    /// Stage the value for the following insert or update.
    fn set_value(&mut self, value: Value);

    /// The key at the current position, or the staged key.
    fn get_key(&self) -> Result<Key>;

    /// The value at the current position, or the staged value.
    fn get_value(&self) -> Result<Value>;

    /// Position at the staged key. `Ok(false)` on a miss.
    fn search(&mut self) -> Result<bool>;

    /// Write the staged (key, value) pair.
    fn insert(&mut self) -> Result<()>;

    /// Write the staged (key, value) pair.
    fn update(&mut self) -> Result<()>;

    /// Remove the staged key.
    ///
    /// # Errors
    /// `NotFound` when the key has no visible value.
    fn remove(&mut self) -> Result<()>;

    /// Apply byte-range edits to the value at the staged key. Requires an
    /// explicit transaction on the owning session.
    fn modify(&mut self, mods: &[Modify]) -> Result<()>;

    /// Advance to the next visible entry. `Ok(false)` past the end, after
    /// which the cursor restarts from the beginning.
    fn next(&mut self) -> Result<bool>;

    /// Step to the previous visible entry. `Ok(false)` past the start.
    fn prev(&mut self) -> Result<bool>;

    /// Clear position and staged key/value; the binding is preserved.
    fn reset(&mut self) -> Result<()>;

    /// Release the cursor. Further operations are invalid.
    fn close(&mut self) -> Result<()>;

    /// The URI the cursor was opened on.
    fn uri(&self) -> &str;
}

impl<C: Cursor + ?Sized> Cursor for Box<C> {
    fn set_key(&mut self, key: Key) {
        (**self).set_key(key)
    }
    fn set_value(&mut self, value: Value) {
        (**self).set_value(value)
    }
    fn get_key(&self) -> Result<Key> {
        (**self).get_key()
    }
    fn get_value(&self) -> Result<Value> {
        (**self).get_value()
    }
    fn search(&mut self) -> Result<bool> {
        (**self).search()
    }
    fn insert(&mut self) -> Result<()> {
        (**self).insert()
    }
    fn update(&mut self) -> Result<()> {
        (**self).update()
    }
    fn remove(&mut self) -> Result<()> {
        (**self).remove()
    }
    fn modify(&mut self, mods: &[Modify]) -> Result<()> {
        (**self).modify(mods)
    }
    fn next(&mut self) -> Result<bool> {
        (**self).next()
    }
    fn prev(&mut self) -> Result<bool> {
        (**self).prev()
    }
    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
    fn uri(&self) -> &str {
        (**self).uri()
    }
}

/// A read-write cursor over one table
pub(crate) struct TableCursor {
    session: Arc<SessionInner>,
    table: Arc<Table>,
    uri: String,
    key: Option<Key>,
    value: Option<Value>,
    current: Option<(Key, Value)>,
    position: Option<Key>,
    closed: bool,
}

impl TableCursor {
    pub(crate) fn new(session: Arc<SessionInner>, table: Arc<Table>, uri: &str) -> Self {
        table.cursor_opened();
        TableCursor {
            session,
            table,
            uri: uri.to_string(),
            key: None,
            value: None,
            current: None,
            position: None,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidArgument(format!(
                "cursor on {} is closed",
                self.uri
            )));
        }
        Ok(())
    }

    fn staged_key(&self) -> Result<Key> {
        let key = self
            .key
            .clone()
            .ok_or_else(|| Error::InvalidArgument("no key set on cursor".to_string()))?;
        self.table.key_format().check_key(&key)?;
        Ok(key)
    }

    fn staged_pair(&self) -> Result<(Key, Value)> {
        let key = self.staged_key()?;
        let value = self
            .value
            .clone()
            .ok_or_else(|| Error::InvalidArgument("no value set on cursor".to_string()))?;
        let value = self.table.value_format().coerce_value(value)?;
        Ok((key, value))
    }
}

impl Cursor for TableCursor {
    fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    fn set_value(&mut self, value: Value) {
        self.value = Some(value);
    }

    fn get_key(&self) -> Result<Key> {
        if let Some((key, _)) = &self.current {
            return Ok(key.clone());
        }
        self.key
            .clone()
            .ok_or_else(|| Error::InvalidArgument("cursor has no key".to_string()))
    }

    fn get_value(&self) -> Result<Value> {
        if let Some((_, value)) = &self.current {
            return Ok(value.clone());
        }
        self.value
            .clone()
            .ok_or_else(|| Error::InvalidArgument("cursor has no value".to_string()))
    }

    fn search(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let key = self.staged_key()?;
        let view = self.session.current_view()?;
        match self.table.read(&key, &view)? {
            Some(value) => {
                self.position = Some(key.clone());
                self.current = Some((key, value));
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn insert(&mut self) -> Result<()> {
        self.ensure_open()?;
        let (key, value) = self.staged_pair()?;
        self.session.apply_write(&self.table, key, Some(value))?;
        self.current = None;
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.ensure_open()?;
        let (key, value) = self.staged_pair()?;
        self.session.apply_write(&self.table, key, Some(value))?;
        self.current = None;
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        self.ensure_open()?;
        let key = self.staged_key()?;
        let view = self.session.current_view()?;
        if self.table.read(&key, &view)?.is_none() {
            return Err(Error::NotFound(format!("{}: key not found", self.uri)));
        }
        self.session.apply_write(&self.table, key, None)?;
        self.current = None;
        Ok(())
    }

    fn modify(&mut self, mods: &[Modify]) -> Result<()> {
        self.ensure_open()?;
        if !self.session.in_transaction() {
            return Err(Error::InvalidArgument(
                "modify requires an explicit transaction".to_string(),
            ));
        }
        let key = self.staged_key()?;
        let view = self.session.current_view()?;
        let value = self
            .table
            .read(&key, &view)?
            .ok_or_else(|| Error::NotFound(format!("{}: key not found", self.uri)))?;
        let value = apply_modifies(&value, mods)?;
        let value = self.table.value_format().coerce_value(value)?;
        self.session.apply_write(&self.table, key, Some(value))?;
        self.current = None;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let view = self.session.current_view()?;
        match self.table.next_visible(self.position.as_ref(), &view)? {
            Some((key, value)) => {
                self.position = Some(key.clone());
                self.current = Some((key, value));
                Ok(true)
            }
            None => {
                // Past the end the cursor unpositions, so the next call
                // starts over from the beginning.
                self.position = None;
                self.current = None;
                Ok(false)
            }
        }
    }

    fn prev(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let view = self.session.current_view()?;
        match self.table.prev_visible(self.position.as_ref(), &view)? {
            Some((key, value)) => {
                self.position = Some(key.clone());
                self.current = Some((key, value));
                Ok(true)
            }
            None => {
                self.position = None;
                self.current = None;
                Ok(false)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.key = None;
        self.value = None;
        self.current = None;
        self.position = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.table.cursor_closed();
        }
        Ok(())
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for TableCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A read-only cursor over a materialized listing
pub(crate) struct ListCursor {
    uri: String,
    rows: Vec<(Key, Value)>,
    pos: Option<usize>,
    key: Option<Key>,
}

impl ListCursor {
    pub(crate) fn new(uri: &str, rows: Vec<(Key, Value)>) -> Self {
        ListCursor {
            uri: uri.to_string(),
            rows,
            pos: None,
            key: None,
        }
    }

    fn read_only_err(&self) -> Error {
        Error::InvalidArgument(format!("{} cursor is read-only", self.uri))
    }
}

impl Cursor for ListCursor {
    fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    fn set_value(&mut self, _value: Value) {}

    fn get_key(&self) -> Result<Key> {
        match self.pos {
            Some(i) => Ok(self.rows[i].0.clone()),
            None => self
                .key
                .clone()
                .ok_or_else(|| Error::InvalidArgument("cursor has no key".to_string())),
        }
    }

    fn get_value(&self) -> Result<Value> {
        match self.pos {
            Some(i) => Ok(self.rows[i].1.clone()),
            None => Err(Error::InvalidArgument("cursor has no value".to_string())),
        }
    }

    fn search(&mut self) -> Result<bool> {
        let key = self
            .key
            .clone()
            .ok_or_else(|| Error::InvalidArgument("no key set on cursor".to_string()))?;
        match self.rows.iter().position(|(k, _)| *k == key) {
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

    fn insert(&mut self) -> Result<()> {
        Err(self.read_only_err())
    }

    fn update(&mut self) -> Result<()> {
        Err(self.read_only_err())
    }

    fn remove(&mut self) -> Result<()> {
        Err(self.read_only_err())
    }

    fn modify(&mut self, _mods: &[Modify]) -> Result<()> {
        Err(self.read_only_err())
    }

    fn next(&mut self) -> Result<bool> {
        let next = match self.pos {
            Some(i) => i + 1,
            None => 0,
        };
        if next < self.rows.len() {
            self.pos = Some(next);
            Ok(true)
        } else {
            self.pos = None;
            Ok(false)
        }
    }

    fn prev(&mut self) -> Result<bool> {
        let prev = match self.pos {
            Some(0) => {
                self.pos = None;
                return Ok(false);
            }
            Some(i) => i - 1,
            None if self.rows.is_empty() => return Ok(false),
            None => self.rows.len() - 1,
        };
        self.pos = Some(prev);
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = None;
        self.key = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}
