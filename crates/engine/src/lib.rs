//! A timestamped, transactional key-value engine for harness testing
//!
//! The engine keeps multi-version data in memory and makes it durable
//! through checkpoint snapshots plus a write-ahead log. Its surface mirrors
//! the connection / session / cursor shape the harness drives: a
//! [`Connection`] owns one home directory, [`Session`]s run transactions
//! against it, and [`Cursor`]s read and write tables.
//!
//! Timestamps order history: commits carry commit and durable timestamps,
//! reads may pin a read timestamp, and the global oldest and stable
//! timestamps bound what is readable and what survives
//! `rollback_to_stable`. Prepared transactions, incremental backup, and
//! crash recovery from the log are all part of the surface because the
//! tests upstairs exist to exercise exactly those paths.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backup;
mod checkpoint;
mod connection;
mod cursor;
pub mod layout;
mod log;
mod session;
mod stats;
mod store;
mod txn;

pub use backup::{BackupCursor, FileManifest, RangeEntry, RangeKind};
pub use connection::Connection;
pub use cursor::{apply_modifies, Cursor, Modify};
pub use session::Session;
pub use txn::Isolation;
