//! Key and value formats
//!
//! Tables fix their key and value formats at creation time using the
//! engine's format codes:
//! - `r`: record number (64-bit, keys only)
//! - `i`: signed integer
//! - `S`: variable-length NUL-terminated string; `NS` truncates at N
//! - `s`: fixed-width string, may embed NUL; `Ns` pads/truncates to N
//! - `u`: raw byte array
//! - `Nt`: fixed-width bit field of N bits (1..=8), values only; removed
//!   cells read back as zero instead of leaving a tombstone
//!
//! The subtle case this module encapsulates is `S` versus `s`: `S` is
//! variable-length and stops at the first NUL, `s` is a fixed-width cell
//! padded with NULs that compares over its full width.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Format parsing and checking errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// The format string is not one of the supported codes.
    #[error("unsupported format string: {0:?}")]
    Unsupported(String),

    /// A key or value does not match the table's declared format.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

/// A parsed single-column format code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatType {
    /// `r`: record number keys
    Record,
    /// `i`: signed integer
    Int,
    /// `S` / `NS`: variable-length string, optionally truncated at N
    VarString {
        /// Truncation length, `None` for plain `S`
        max: Option<usize>,
    },
    /// `s` / `Ns`: fixed-width string of exactly N bytes
    FixString {
        /// Cell width in bytes
        len: usize,
    },
    /// `u`: raw bytes
    Bytes,
    /// `Nt`: fixed bit field, 1..=8 bits, value formats only
    FixedBits {
        /// Number of significant bits
        bits: u8,
    },
}

impl FormatType {
    /// Parse a single-column format code.
    ///
    /// # Errors
    /// Returns `Unsupported` for compound formats and unknown codes.
    pub fn parse(s: &str) -> Result<Self, FormatError> {
        let (prefix, code) = split_prefix(s)?;
        match (code, prefix) {
            ("r", None) => Ok(FormatType::Record),
            ("i", None) => Ok(FormatType::Int),
            ("S", n) => Ok(FormatType::VarString { max: n }),
            ("s", n) => Ok(FormatType::FixString { len: n.unwrap_or(1) }),
            ("u", None) => Ok(FormatType::Bytes),
            ("t", Some(bits)) if (1..=8).contains(&bits) => Ok(FormatType::FixedBits {
                bits: bits as u8,
            }),
            _ => Err(FormatError::Unsupported(s.to_string())),
        }
    }

    /// True for record-number key formats.
    pub fn is_record(self) -> bool {
        matches!(self, FormatType::Record)
    }

    /// True for fixed bit-field value formats (no tombstones on remove).
    pub fn is_fixed_bits(self) -> bool {
        matches!(self, FormatType::FixedBits { .. })
    }

    /// Check that `key` matches this format when used as a key format.
    pub fn check_key(self, key: &Key) -> Result<(), FormatError> {
        let ok = matches!(
            (self, key),
            (FormatType::Record, Key::Record(_))
                | (FormatType::Int, Key::Int(_))
                | (FormatType::VarString { .. }, Key::Str(_))
                | (FormatType::FixString { .. }, Key::Str(_))
                | (FormatType::Bytes, Key::Bytes(_))
        );
        if ok {
            Ok(())
        } else {
            Err(FormatError::TypeMismatch(format!(
                "key {:?} does not match format {:?}",
                key, self
            )))
        }
    }

    /// Check and canonicalize `value` under this format when used as a
    /// value format: strings are truncated (`NS`) or padded (`Ns`), bit
    /// fields are masked to their declared width.
    pub fn coerce_value(self, value: Value) -> Result<Value, FormatError> {
        match (self, value) {
            (FormatType::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (FormatType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (FormatType::VarString { max }, Value::Str(mut s)) => {
                if let Some(max) = max {
                    // Variable-length strings stop at the truncation point.
                    if s.len() > max {
                        s.truncate(max);
                    }
                }
                Ok(Value::Str(s))
            }
            (FormatType::FixString { len }, Value::Str(mut s)) => {
                // Fixed-width cells always occupy exactly `len` bytes.
                if s.len() > len {
                    s.truncate(len);
                } else {
                    while s.len() < len {
                        s.push('\0');
                    }
                }
                Ok(Value::Str(s))
            }
            (FormatType::FixedBits { bits }, Value::Bits(v)) => {
                let mask = if bits == 8 { 0xff } else { (1u8 << bits) - 1 };
                Ok(Value::Bits(v & mask))
            }
            (fmt, v) => Err(FormatError::TypeMismatch(format!(
                "value {:?} does not match format {:?}",
                v, fmt
            ))),
        }
    }

    /// The value a removed cell reads back as, when the format has one.
    /// Only fixed bit fields behave this way; every other format leaves a
    /// true gap.
    pub fn removed_cell_value(self) -> Option<Value> {
        match self {
            FormatType::FixedBits { .. } => Some(Value::Bits(0)),
            _ => None,
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatType::Record => write!(f, "r"),
            FormatType::Int => write!(f, "i"),
            FormatType::VarString { max: None } => write!(f, "S"),
            FormatType::VarString { max: Some(n) } => write!(f, "{}S", n),
            FormatType::FixString { len } => write!(f, "{}s", len),
            FormatType::Bytes => write!(f, "u"),
            FormatType::FixedBits { bits } => write!(f, "{}t", bits),
        }
    }
}

fn split_prefix(s: &str) -> Result<(Option<usize>, &str), FormatError> {
    let digits: usize = s.bytes().take_while(|b| b.is_ascii_digit()).count();
    let (num, rest) = s.split_at(digits);
    if rest.len() != 1 {
        return Err(FormatError::Unsupported(s.to_string()));
    }
    let prefix = if num.is_empty() {
        None
    } else {
        Some(
            num.parse::<usize>()
                .map_err(|_| FormatError::Unsupported(s.to_string()))?,
        )
    };
    Ok((prefix, rest))
}

/// A table key under one of the supported key formats
///
/// Ordering is the engine's btree ordering for the matching format; a table
/// only ever holds one variant so cross-variant ordering is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Record number (`r`), 1-based
    Record(u64),
    /// Signed integer (`i`)
    Int(i64),
    /// String (`S` / `s` families)
    Str(String),
    /// Raw bytes (`u`)
    Bytes(Vec<u8>),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Record(n) => write!(f, "{}", n),
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{}", s),
            Key::Bytes(b) => write!(f, "{:02x?}", b),
        }
    }
}

/// A table value under one of the supported value formats
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Fixed bit field (`Nt`)
    Bits(u8),
    /// Signed integer (`i`)
    Int(i64),
    /// String (`S` / `s` families)
    Str(String),
    /// Raw bytes (`u`)
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bits(v) => write!(f, "{}", v),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{:02x?}", b),
        }
    }
}
