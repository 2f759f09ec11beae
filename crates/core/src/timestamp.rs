//! Logical timestamps
//!
//! A timestamp is a 64-bit unsigned counter. The engine boundary renders
//! timestamps as lowercase hexadecimal with no prefix and no padding; zero
//! is reserved to mean "unset" and is never a legal transaction timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// A 64-bit logical timestamp
///
/// Ordering follows the raw integer value. `Timestamp::NONE` (zero) is the
/// reserved unset value; the engine rejects it anywhere a transaction
/// timestamp is required.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The reserved "unset" timestamp.
    pub const NONE: Timestamp = Timestamp(0);

    /// Wrap a raw counter value.
    pub fn new(raw: u64) -> Self {
        Timestamp(raw)
    }

    /// The raw counter value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// True if this timestamp has been set (non-zero).
    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    /// Canonical rendering: lowercase hex, no prefix, no padding.
    pub fn hex(self) -> String {
        format!("{:x}", self.0)
    }

    /// Parse the canonical hex rendering.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an empty string or non-hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidArgument("empty timestamp string".to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Timestamp)
            .map_err(|_| Error::InvalidArgument(format!("invalid timestamp string: {}", s)))
    }
}

// Display is the canonical hex rendering so timestamps can be spliced
// directly into configuration strings.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Canonical rendering of an integer timestamp.
///
/// This is the helper test bodies reach for when constructing configuration
/// strings by hand: `format!("commit_timestamp={}", timestamp_str(5))`.
pub fn timestamp_str(n: u64) -> String {
    format!("{:x}", n)
}

/// Strictly monotonic timestamp generator
///
/// Each test owns one clock; `next()` never returns the same value twice and
/// never returns zero. The clock can be advanced past an externally chosen
/// point with `advance_to`.
#[derive(Debug)]
pub struct TimestampClock {
    last: AtomicU64,
}

impl TimestampClock {
    /// Create a clock whose first `next()` returns 1.
    pub fn new() -> Self {
        TimestampClock {
            last: AtomicU64::new(0),
        }
    }

    /// Create a clock whose first `next()` returns `start + 1`.
    pub fn starting_at(start: u64) -> Self {
        TimestampClock {
            last: AtomicU64::new(start),
        }
    }

    /// The next strictly greater timestamp.
    pub fn next(&self) -> Timestamp {
        Timestamp(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently issued timestamp (zero if none issued yet).
    pub fn current(&self) -> Timestamp {
        Timestamp(self.last.load(Ordering::SeqCst))
    }

    /// Ensure future `next()` values are strictly greater than `floor`.
    pub fn advance_to(&self, floor: Timestamp) {
        self.last.fetch_max(floor.raw(), Ordering::SeqCst);
    }
}

impl Default for TimestampClock {
    fn default() -> Self {
        Self::new()
    }
}
