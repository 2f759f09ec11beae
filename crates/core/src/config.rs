//! Engine configuration grammar
//!
//! The engine boundary speaks comma-separated `key=value` strings; values
//! may be quoted, and parentheses group sub-configurations or lists. The
//! harness side never concatenates raw strings: [`ConfigBuilder`] produces
//! the string at call time and rejects keys the target API method does not
//! accept, so a typo fails in the harness instead of deep inside the engine.
//!
//! Parsing lives here too because the reference engine consumes the same
//! grammar on its side of the boundary.

use std::fmt::Write as _;
use thiserror::Error;

use crate::error::Error;
use crate::timestamp::Timestamp;

/// Configuration grammar errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A key was used with an API method that does not accept it.
    #[error("unknown configuration key '{key}' for {context}")]
    UnknownKey {
        /// API method the builder targets
        context: &'static str,
        /// Offending key
        key: String,
    },

    /// The input string violated the grammar.
    #[error("configuration syntax error at byte {offset}: {message}")]
    Syntax {
        /// Byte offset of the failure
        offset: usize,
        /// What went wrong
        message: String,
    },

    /// A value could not be interpreted at the requested type.
    #[error("bad value for '{key}': {message}")]
    BadValue {
        /// Key whose value was malformed
        key: String,
        /// What went wrong
        message: String,
    },
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

/// A parsed configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigItem {
    /// Bare word or quoted string
    Str(String),
    /// Parenthesised `key=value` group
    Nested(ConfigMap),
    /// Parenthesised list of words
    List(Vec<String>),
}

impl ConfigItem {
    /// The string form, if this is a plain value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigItem::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret as a boolean. A bare flag parses as `true`.
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_str()? {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// Interpret as an unsigned integer, honoring `K`/`M`/`G` suffixes the
    /// engine accepts for byte sizes.
    pub fn as_u64(&self) -> Option<u64> {
        let s = self.as_str()?;
        let (digits, mult) = match s.as_bytes().last()? {
            b'K' | b'k' => (&s[..s.len() - 1], 1u64 << 10),
            b'M' | b'm' => (&s[..s.len() - 1], 1u64 << 20),
            b'G' | b'g' => (&s[..s.len() - 1], 1u64 << 30),
            _ => (&s[..], 1),
        };
        digits.parse::<u64>().ok().map(|n| n * mult)
    }

    /// Interpret as a logical timestamp in the canonical hex rendering.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        Timestamp::from_hex(self.as_str()?).ok()
    }

    /// The nested sub-configuration, if present.
    pub fn as_nested(&self) -> Option<&ConfigMap> {
        match self {
            ConfigItem::Nested(m) => Some(m),
            _ => None,
        }
    }

    /// The list items, if this is a list.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ConfigItem::List(v) => Some(v),
            _ => None,
        }
    }
}

/// An ordered `key -> value` association parsed from a configuration string
///
/// Later occurrences of a key override earlier ones, matching the engine's
/// last-writer-wins reading of its configuration strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
    entries: Vec<(String, ConfigItem)>,
}

impl ConfigMap {
    /// Look up a key, honoring last-writer-wins.
    pub fn get(&self, key: &str) -> Option<&ConfigItem> {
        self.entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Boolean value of `key`; `default` when absent.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(ConfigItem::as_bool).unwrap_or(default)
    }

    /// String value of `key`, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConfigItem::as_str)
    }

    /// Timestamp value of `key`, if present and well-formed.
    pub fn get_timestamp(&self, key: &str) -> Option<Timestamp> {
        self.get(key).and_then(ConfigItem::as_timestamp)
    }

    /// Iterate entries in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigItem)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True when no keys were given.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a configuration string into an ordered map.
///
/// # Errors
/// Returns `ConfigError::Syntax` for unbalanced parentheses, unterminated
/// quotes, or empty keys.
pub fn parse_config(input: &str) -> Result<ConfigMap, ConfigError> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
    };
    let map = parser.group(false)?;
    if parser.pos != parser.input.len() {
        return Err(ConfigError::Syntax {
            offset: parser.pos,
            message: "trailing input after configuration".to_string(),
        });
    }
    Ok(map)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n')) {
            self.pos += 1;
        }
    }

    // Parse a comma-separated key[=value] sequence. When `nested` is set the
    // group ends at the matching ')'; otherwise it ends at end of input.
    fn group(&mut self, nested: bool) -> Result<ConfigMap, ConfigError> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b')') if nested => break,
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            let key = self.word()?;
            if key.is_empty() {
                return Err(ConfigError::Syntax {
                    offset: self.pos,
                    message: "empty configuration key".to_string(),
                });
            }
            self.skip_ws();
            let value = if self.peek() == Some(b'=') {
                self.pos += 1;
                self.value()?
            } else {
                // Bare flag means boolean true.
                ConfigItem::Str("true".to_string())
            };
            entries.push((key, value));
        }
        Ok(ConfigMap { entries })
    }

    fn word(&mut self) -> Result<String, ConfigError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b'=' | b',' | b'(' | b')' | b'"' | b' ' | b'\t' | b'\n' => break,
                _ => self.pos += 1,
            }
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn value(&mut self) -> Result<ConfigItem, ConfigError> {
        self.skip_ws();
        match self.peek() {
            Some(b'"') => {
                self.pos += 1;
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == b'"' {
                        let s = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
                        self.pos += 1;
                        return Ok(ConfigItem::Str(s));
                    }
                    self.pos += 1;
                }
                Err(ConfigError::Syntax {
                    offset: start,
                    message: "unterminated quoted value".to_string(),
                })
            }
            Some(b'(') => {
                self.pos += 1;
                let open = self.pos;
                // A group containing '=' at top level is a sub-configuration,
                // otherwise it is a list of words.
                if self.group_is_nested(open) {
                    let map = self.group(true)?;
                    self.expect_close(open)?;
                    Ok(ConfigItem::Nested(map))
                } else {
                    let items = self.list()?;
                    self.expect_close(open)?;
                    Ok(ConfigItem::List(items))
                }
            }
            _ => Ok(ConfigItem::Str(self.word()?)),
        }
    }

    fn expect_close(&mut self, open: usize) -> Result<(), ConfigError> {
        if self.peek() == Some(b')') {
            self.pos += 1;
            Ok(())
        } else {
            Err(ConfigError::Syntax {
                offset: open,
                message: "unbalanced parenthesis".to_string(),
            })
        }
    }

    fn group_is_nested(&self, from: usize) -> bool {
        let mut depth = 0usize;
        let mut in_quote = false;
        for &c in &self.input[from..] {
            match c {
                b'"' => in_quote = !in_quote,
                _ if in_quote => {}
                b'(' => depth += 1,
                b')' => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                b'=' if depth == 0 => return true,
                _ => {}
            }
        }
        false
    }

    fn list(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None | Some(b')') => break,
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'"') => {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().map_or(false, |c| c != b'"') {
                        self.pos += 1;
                    }
                    if self.peek().is_none() {
                        return Err(ConfigError::Syntax {
                            offset: start,
                            message: "unterminated quoted list item".to_string(),
                        });
                    }
                    items.push(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned());
                    self.pos += 1;
                }
                _ => {
                    let w = self.word()?;
                    if w.is_empty() {
                        return Err(ConfigError::Syntax {
                            offset: self.pos,
                            message: "empty list item".to_string(),
                        });
                    }
                    items.push(w);
                }
            }
        }
        Ok(items)
    }
}

// Key tables per API method. A builder rejects any key not listed for its
// context, which is the harness-side guard the engine's own per-method
// tables provide on the native side. The tables are public so the engine
// can run the same check on the strings it receives.

/// Keys accepted by `Connection::open`.
pub const CONNECTION_OPEN: &[&str] = &[
    "create",
    "cache_size",
    "log",
    "statistics",
    "in_memory",
    "error_prefix",
];
/// Keys accepted inside `log=(...)` of `Connection::open`.
pub const LOG_SUBCONFIG: &[&str] = &["enabled", "remove"];
/// Keys accepted by `Connection::set_timestamp`.
pub const SET_TIMESTAMP: &[&str] = &["oldest_timestamp", "stable_timestamp", "durable_timestamp"];
/// Keys accepted by `Connection::query_timestamp`.
pub const QUERY_TIMESTAMP: &[&str] = &["get"];
/// Keys accepted by `Connection::rollback_to_stable`.
pub const ROLLBACK_TO_STABLE: &[&str] = &["dryrun"];
/// Keys accepted by `Session::begin_transaction`.
pub const BEGIN_TRANSACTION: &[&str] = &[
    "isolation",
    "read_timestamp",
    "ignore_prepare",
    "no_timestamp",
    "name",
];
/// Keys accepted by `Session::commit_transaction`.
pub const COMMIT_TRANSACTION: &[&str] = &["commit_timestamp", "durable_timestamp"];
/// Keys accepted by `Session::rollback_transaction`.
pub const ROLLBACK_TRANSACTION: &[&str] = &[];
/// Keys accepted by `Session::prepare_transaction`.
pub const PREPARE_TRANSACTION: &[&str] = &["prepare_timestamp", "prepared_id"];
/// Keys accepted by `Session::timestamp_transaction`.
pub const TIMESTAMP_TRANSACTION: &[&str] = &[
    "commit_timestamp",
    "durable_timestamp",
    "prepare_timestamp",
    "read_timestamp",
];
/// Keys accepted by `Session::checkpoint`.
pub const CHECKPOINT: &[&str] = &["force", "name", "precise", "flush_tier"];
/// Keys accepted by `Session::create`.
pub const SESSION_CREATE: &[&str] = &["key_format", "value_format", "log"];
/// Keys accepted by `Session::drop`.
pub const SESSION_DROP: &[&str] = &["force", "remove_files"];
/// Keys accepted by `Session::open_cursor`.
pub const OPEN_CURSOR: &[&str] = &["incremental", "target", "readonly", "debug"];
/// Keys accepted inside `incremental=(...)` of backup cursors.
pub const INCREMENTAL: &[&str] = &[
    "enabled",
    "granularity",
    "this_id",
    "src_id",
    "force_stop",
    "consolidate",
];

/// Reject any key in `map` that `allowed` does not list for `context`.
///
/// The reference engine applies the same per-method tables to strings it
/// receives that [`ConfigBuilder`] applies when producing them.
pub fn check_keys(
    context: &'static str,
    allowed: &[&str],
    map: &ConfigMap,
) -> Result<(), ConfigError> {
    for (key, _) in map.iter() {
        if !allowed.contains(&key) {
            return Err(ConfigError::UnknownKey {
                context,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// Typed builder for engine configuration strings
///
/// Each constructor targets one API method; setters validate keys against
/// that method's table and `build()` renders the final string.
///
/// # Example
///
/// ```
/// use wiredtest_core::config::ConfigBuilder;
/// use wiredtest_core::timestamp::Timestamp;
///
/// let cfg = ConfigBuilder::set_timestamp()
///     .set_ts("stable_timestamp", Timestamp::new(16))
///     .unwrap()
///     .build();
/// assert_eq!(cfg, "stable_timestamp=10");
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    context: &'static str,
    allowed: &'static [&'static str],
    parts: Vec<String>,
}

impl ConfigBuilder {
    fn new(context: &'static str, allowed: &'static [&'static str]) -> Self {
        ConfigBuilder {
            context,
            allowed,
            parts: Vec::new(),
        }
    }

    /// Builder for `Connection::open`.
    pub fn connection_open() -> Self {
        Self::new("connection.open", CONNECTION_OPEN)
    }

    /// Builder for the `log=(...)` sub-configuration of `Connection::open`.
    pub fn log_subconfig() -> Self {
        Self::new("connection.open.log", LOG_SUBCONFIG)
    }

    /// Builder for `Connection::set_timestamp`.
    pub fn set_timestamp() -> Self {
        Self::new("connection.set_timestamp", SET_TIMESTAMP)
    }

    /// Builder for `Connection::query_timestamp`.
    pub fn query_timestamp() -> Self {
        Self::new("connection.query_timestamp", QUERY_TIMESTAMP)
    }

    /// Builder for `Connection::rollback_to_stable`.
    pub fn rollback_to_stable() -> Self {
        Self::new("connection.rollback_to_stable", ROLLBACK_TO_STABLE)
    }

    /// Builder for `Session::begin_transaction`.
    pub fn begin_transaction() -> Self {
        Self::new("session.begin_transaction", BEGIN_TRANSACTION)
    }

    /// Builder for `Session::commit_transaction`.
    pub fn commit_transaction() -> Self {
        Self::new("session.commit_transaction", COMMIT_TRANSACTION)
    }

    /// Builder for `Session::rollback_transaction`.
    pub fn rollback_transaction() -> Self {
        Self::new("session.rollback_transaction", ROLLBACK_TRANSACTION)
    }

    /// Builder for `Session::prepare_transaction`.
    pub fn prepare_transaction() -> Self {
        Self::new("session.prepare_transaction", PREPARE_TRANSACTION)
    }

    /// Builder for `Session::timestamp_transaction`.
    pub fn timestamp_transaction() -> Self {
        Self::new("session.timestamp_transaction", TIMESTAMP_TRANSACTION)
    }

    /// Builder for `Session::checkpoint`.
    pub fn checkpoint() -> Self {
        Self::new("session.checkpoint", CHECKPOINT)
    }

    /// Builder for `Session::create`.
    pub fn session_create() -> Self {
        Self::new("session.create", SESSION_CREATE)
    }

    /// Builder for `Session::drop`.
    pub fn session_drop() -> Self {
        Self::new("session.drop", SESSION_DROP)
    }

    /// Builder for `Session::open_cursor`.
    pub fn open_cursor() -> Self {
        Self::new("session.open_cursor", OPEN_CURSOR)
    }

    /// Builder for the `incremental=(...)` sub-configuration of backup
    /// cursors.
    pub fn incremental() -> Self {
        Self::new("session.open_cursor.incremental", INCREMENTAL)
    }

    fn check(&self, key: &str) -> Result<(), ConfigError> {
        if self.allowed.contains(&key) {
            Ok(())
        } else {
            Err(ConfigError::UnknownKey {
                context: self.context,
                key: key.to_string(),
            })
        }
    }

    /// Set a string-valued key.
    pub fn set_str(mut self, key: &str, value: &str) -> Result<Self, ConfigError> {
        self.check(key)?;
        if value.bytes().any(|c| matches!(c, b',' | b'=' | b'(' | b')' | b' ')) {
            self.parts.push(format!("{}=\"{}\"", key, value));
        } else {
            self.parts.push(format!("{}={}", key, value));
        }
        Ok(self)
    }

    /// Set a boolean key.
    pub fn set_bool(mut self, key: &str, value: bool) -> Result<Self, ConfigError> {
        self.check(key)?;
        self.parts.push(format!("{}={}", key, value));
        Ok(self)
    }

    /// Set an integer key.
    pub fn set_u64(mut self, key: &str, value: u64) -> Result<Self, ConfigError> {
        self.check(key)?;
        self.parts.push(format!("{}={}", key, value));
        Ok(self)
    }

    /// Set a timestamp key in the canonical hex rendering.
    pub fn set_ts(mut self, key: &str, value: Timestamp) -> Result<Self, ConfigError> {
        self.check(key)?;
        self.parts.push(format!("{}={:x}", key, value.raw()));
        Ok(self)
    }

    /// Set a nested sub-configuration built with another builder.
    pub fn nested(mut self, key: &str, sub: ConfigBuilder) -> Result<Self, ConfigError> {
        self.check(key)?;
        self.parts.push(format!("{}=({})", key, sub.build()));
        Ok(self)
    }

    /// Set a parenthesised list value, each item quoted.
    pub fn list(mut self, key: &str, items: &[&str]) -> Result<Self, ConfigError> {
        self.check(key)?;
        let mut rendered = String::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                rendered.push(',');
            }
            let _ = write!(rendered, "\"{}\"", item);
        }
        self.parts.push(format!("{}=({})", key, rendered));
        Ok(self)
    }

    /// Render the configuration string.
    pub fn build(self) -> String {
        self.parts.join(",")
    }
}
