//! Canonical dataset builders
//!
//! Most storage tests need a table full of predictable data more than they
//! need interesting data. The builders here generate canonical keys and
//! values as pure functions of the row index and the active formats, so a
//! test can populate, mutate through whatever path it is exercising, and
//! then `check()` the survivors against the canon.
//!
//! Row indexes are 1-based, matching record-number tables.

use wiredtest_core::{Error, FormatType, Key, Result, Value};
use wiredtest_engine::{Cursor, Session};

use crate::scenario::Scenario;

const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

fn canonical_key(format: FormatType, i: u64) -> Key {
    match format {
        FormatType::Record => Key::Record(i),
        FormatType::Int => Key::Int(i as i64),
        FormatType::Bytes => Key::Bytes(format!("{:015}", i).into_bytes()),
        _ => Key::Str(format!("{:015}", i)),
    }
}

fn canonical_value(format: FormatType, i: u64, salt: &str) -> Value {
    match format {
        FormatType::FixedBits { bits } => {
            let mask = if bits == 8 { 0xff } else { (1u8 << bits) - 1 };
            Value::Bits(((i % 0xff) as u8) & mask)
        }
        FormatType::Int => Value::Int(i as i64),
        FormatType::Bytes => Value::Bytes(format!("{}{}: {}", salt, i, ALPHABET).into_bytes()),
        FormatType::VarString { max } => {
            let mut s = format!("{}{}: {}", salt, i, ALPHABET);
            if let Some(max) = max {
                s.truncate(max);
            }
            Value::Str(s)
        }
        FormatType::FixString { len } => {
            let mut s = format!("{}{}: {}", salt, i, ALPHABET);
            s.truncate(len);
            while s.len() < len {
                s.push('\0');
            }
            Value::Str(s)
        }
        // Record is not a value format; the constructors reject it.
        FormatType::Record => Value::Str(String::new()),
    }
}

fn check_rows(
    cursor: &mut Box<dyn Cursor>,
    uri: &str,
    nrows: u64,
    expect: impl Fn(u64) -> (Key, Value),
) -> Result<()> {
    for i in 1..=nrows {
        if !cursor.next()? {
            return Err(Error::Corruption(format!(
                "{}: expected {} rows, found {}",
                uri,
                nrows,
                i - 1
            )));
        }
        let (key, value) = expect(i);
        let (got_key, got_value) = (cursor.get_key()?, cursor.get_value()?);
        if got_key != key || got_value != value {
            return Err(Error::Corruption(format!(
                "{}: row {}: expected ({:?}, {:?}), found ({:?}, {:?})",
                uri, i, key, value, got_key, got_value
            )));
        }
    }
    if cursor.next()? {
        return Err(Error::Corruption(format!(
            "{}: more than {} rows",
            uri, nrows
        )));
    }
    Ok(())
}

/// A single table of canonical rows
#[derive(Debug, Clone)]
pub struct SimpleDataSet {
    uri: String,
    nrows: u64,
    key_format: FormatType,
    value_format: FormatType,
    extra_config: String,
}

impl SimpleDataSet {
    /// A dataset of `nrows` string rows at `uri`.
    pub fn new(uri: &str, nrows: u64) -> SimpleDataSet {
        SimpleDataSet {
            uri: uri.to_string(),
            nrows,
            key_format: FormatType::VarString { max: None },
            value_format: FormatType::VarString { max: None },
            extra_config: String::new(),
        }
    }

    /// Derive formats and row count from scenario parameters.
    ///
    /// Reads `key_format`, `value_format`, and `nrows` when present;
    /// anything absent keeps the defaults.
    pub fn from_scenario(scenario: &Scenario, uri: &str, nrows: u64) -> Result<SimpleDataSet> {
        let mut ds = SimpleDataSet::new(uri, nrows);
        if let Some(v) = scenario.get("key_format").and_then(|v| v.as_str()) {
            ds = ds.key_format(v)?;
        }
        if let Some(v) = scenario.get("value_format").and_then(|v| v.as_str()) {
            ds = ds.value_format(v)?;
        }
        if let Some(n) = scenario.get("nrows").and_then(|v| v.as_i64()) {
            ds.nrows = n as u64;
        }
        Ok(ds)
    }

    /// Set the key format.
    ///
    /// # Errors
    /// `InvalidArgument` for formats keys cannot use (`8t`).
    pub fn key_format(mut self, format: &str) -> Result<SimpleDataSet> {
        let parsed =
            FormatType::parse(format).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        if parsed.is_fixed_bits() {
            return Err(Error::InvalidArgument(
                "fixed bit fields are not a key format".to_string(),
            ));
        }
        self.key_format = parsed;
        Ok(self)
    }

    /// Set the value format.
    ///
    /// # Errors
    /// `InvalidArgument` for `r`, which is key-only.
    pub fn value_format(mut self, format: &str) -> Result<SimpleDataSet> {
        let parsed =
            FormatType::parse(format).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        if parsed.is_record() {
            return Err(Error::InvalidArgument(
                "record numbers are not a value format".to_string(),
            ));
        }
        self.value_format = parsed;
        Ok(self)
    }

    /// Append extra table creation configuration, e.g. `log=(enabled=false)`.
    pub fn config(mut self, config: &str) -> SimpleDataSet {
        self.extra_config = config.to_string();
        self
    }

    /// The table URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The number of canonical rows.
    pub fn nrows(&self) -> u64 {
        self.nrows
    }

    fn create_config(&self) -> String {
        let mut cfg = format!(
            "key_format={},value_format={}",
            self.key_format, self.value_format
        );
        if !self.extra_config.is_empty() {
            cfg.push(',');
            cfg.push_str(&self.extra_config);
        }
        cfg
    }

    /// The canonical key of row `i`.
    pub fn key(&self, i: u64) -> Key {
        canonical_key(self.key_format, i)
    }

    /// The canonical value of row `i`.
    pub fn value(&self, i: u64) -> Value {
        canonical_value(self.value_format, i, "")
    }

    /// Create the table and insert the canonical rows.
    pub fn populate(&self, session: &Session) -> Result<()> {
        session.create(&self.uri, &self.create_config())?;
        let mut cursor = session.open_cursor(&self.uri, "")?;
        for i in 1..=self.nrows {
            cursor.set_key(self.key(i));
            cursor.set_value(self.value(i));
            cursor.insert()?;
        }
        tracing::debug!(uri = %self.uri, rows = self.nrows, "dataset populated");
        Ok(())
    }

    /// Open a cursor on the dataset's table.
    pub fn open_cursor(&self, session: &Session) -> Result<Box<dyn Cursor>> {
        session.open_cursor(&self.uri, "")
    }

    /// Assert the table holds exactly the canonical rows, in order.
    ///
    /// # Errors
    /// `Corruption` describing the first divergence.
    pub fn check(&self, session: &Session) -> Result<()> {
        let mut cursor = self.open_cursor(session)?;
        check_rows(&mut cursor, &self.uri, self.nrows, |i| {
            (self.key(i), self.value(i))
        })
    }
}

/// A primary table plus a derived index table
///
/// The complex dataset models tests that keep redundant structures in
/// step: a primary table of compound string values and an `_index` table
/// mapping each derived secondary key back to the primary key rendering.
/// `check()` verifies both and their agreement.
#[derive(Debug, Clone)]
pub struct ComplexDataSet {
    uri: String,
    index_uri: String,
    nrows: u64,
    key_format: FormatType,
}

impl ComplexDataSet {
    /// A complex dataset of `nrows` rows at `uri`.
    pub fn new(uri: &str, nrows: u64) -> ComplexDataSet {
        ComplexDataSet {
            uri: uri.to_string(),
            index_uri: format!("{}_index", uri),
            nrows,
            key_format: FormatType::VarString { max: None },
        }
    }

    /// Set the primary key format.
    ///
    /// # Errors
    /// `InvalidArgument` for formats keys cannot use (`8t`).
    pub fn key_format(mut self, format: &str) -> Result<ComplexDataSet> {
        let parsed =
            FormatType::parse(format).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        if parsed.is_fixed_bits() {
            return Err(Error::InvalidArgument(
                "fixed bit fields are not a key format".to_string(),
            ));
        }
        self.key_format = parsed;
        Ok(self)
    }

    /// The primary table URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The canonical primary key of row `i`.
    pub fn key(&self, i: u64) -> Key {
        canonical_key(self.key_format, i)
    }

    /// The canonical compound value of row `i`.
    pub fn value(&self, i: u64) -> Value {
        canonical_value(FormatType::VarString { max: None }, i, "field0/")
    }

    fn index_key(&self, i: u64) -> Key {
        // Secondary keys sort differently from primary keys on purpose.
        Key::Str(format!("{}/{:015}", &ALPHABET[(i % 26) as usize..=(i % 26) as usize], i))
    }

    fn index_value(&self, i: u64) -> Value {
        Value::Str(format!("{}", self.key(i)))
    }

    /// Create both tables and insert the canonical rows.
    pub fn populate(&self, session: &Session) -> Result<()> {
        session.create(
            &self.uri,
            &format!("key_format={},value_format=S", self.key_format),
        )?;
        session.create(&self.index_uri, "key_format=S,value_format=S")?;

        let mut cursor = session.open_cursor(&self.uri, "")?;
        let mut index = session.open_cursor(&self.index_uri, "")?;
        for i in 1..=self.nrows {
            cursor.set_key(self.key(i));
            cursor.set_value(self.value(i));
            cursor.insert()?;
            index.set_key(self.index_key(i));
            index.set_value(self.index_value(i));
            index.insert()?;
        }
        tracing::debug!(uri = %self.uri, rows = self.nrows, "complex dataset populated");
        Ok(())
    }

    /// Assert both tables hold exactly the canonical rows.
    ///
    /// # Errors
    /// `Corruption` describing the first divergence.
    pub fn check(&self, session: &Session) -> Result<()> {
        let mut cursor = session.open_cursor(&self.uri, "")?;
        check_rows(&mut cursor, &self.uri, self.nrows, |i| {
            (self.key(i), self.value(i))
        })?;
        drop(cursor);

        // The index is checked by point lookups; its scan order differs.
        let mut index = session.open_cursor(&self.index_uri, "")?;
        for i in 1..=self.nrows {
            index.set_key(self.index_key(i));
            if !index.search()? {
                return Err(Error::Corruption(format!(
                    "{}: missing index entry for row {}",
                    self.index_uri, i
                )));
            }
            let got = index.get_value()?;
            let want = self.index_value(i);
            if got != want {
                return Err(Error::Corruption(format!(
                    "{}: row {}: expected {:?}, found {:?}",
                    self.index_uri, i, want, got
                )));
            }
        }
        Ok(())
    }
}
