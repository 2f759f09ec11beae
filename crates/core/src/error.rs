//! Error types for the WiredTest harness
//!
//! Engine errors carry a stable kind plus the engine's message verbatim.
//! The harness inspects the kind for busy/rollback/not-found decisions and
//! matches the message text against output patterns; it never rewrites the
//! message on the way through.

use std::io;
use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the engine boundary and the harness
#[derive(Debug, Error)]
pub enum Error {
    /// Engine resource is temporarily held (second connection, open cursor
    /// during drop). Retry wrappers spin on this kind.
    #[error("resource busy: {0}")]
    Busy(String),

    /// The transaction must be abandoned and retried by the caller.
    #[error("transaction rolled back: {reason}")]
    Rollback {
        /// Reason string reported by the engine, available to tests via
        /// [`Error::rollback_reason`]
        reason: String,
    },

    /// A lookup missed. Cursor search reports this as a sentinel return
    /// value; this kind exists for URI-level lookups (drop, verify).
    #[error("not found: {0}")]
    NotFound(String),

    /// A read observed a prepared but uncommitted update.
    #[error("conflict with a prepared update")]
    PrepareConflict,

    /// Misuse detected before any I/O was issued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine detected an on-disk invariant violation.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// The engine is in an unrecoverable state; fatal to the test.
    #[error("engine panic: {0}")]
    Panic(String),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encode/decode failure in log or snapshot records.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// True if this is the transient busy condition.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }

    /// True if the transaction was rolled back by the engine.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Error::Rollback { .. })
    }

    /// True if a lookup missed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True if a read hit a prepared update.
    pub fn is_prepare_conflict(&self) -> bool {
        matches!(self, Error::PrepareConflict)
    }

    /// The engine's rollback reason, when this is a rollback error.
    pub fn rollback_reason(&self) -> Option<&str> {
        match self {
            Error::Rollback { reason } => Some(reason),
            _ => None,
        }
    }

    /// True for conditions that are fatal to the owning test and force
    /// working-directory preservation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::Panic(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<crate::format::FormatError> for Error {
    fn from(e: crate::format::FormatError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_kind() {
        let err = Error::Busy("cursor open on table:t".to_string());
        assert!(err.is_busy());
        assert!(!err.is_rollback());
        assert!(err.to_string().contains("resource busy"));
    }

    #[test]
    fn test_rollback_reason_passthrough() {
        let err = Error::Rollback {
            reason: "oldest pinned transaction ID rolled back for eviction".to_string(),
        };
        assert!(err.is_rollback());
        assert_eq!(
            err.rollback_reason(),
            Some("oldest pinned transaction ID rolled back for eviction")
        );
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(Error::Corruption("bad block".into()).is_fatal());
        assert!(Error::Panic("unrecoverable".into()).is_fatal());
        assert!(!Error::Busy("held".into()).is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.to_string().contains("I/O error"));
    }
}
