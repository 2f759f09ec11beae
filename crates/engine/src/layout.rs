//! On-disk layout of an engine home directory
//!
//! A home directory contains:
//! - `WiredTest.lock`: advisory lock file, runtime-only
//! - `WiredTest.meta`: table catalog, checkpoint metadata, global timestamps
//! - `WiredTestLog.0000000001`: the write-ahead log segment
//! - `<table>.wt`: one checkpoint snapshot per table
//! - `*.wttmp`: checkpoint staging files, renamed into place on success
//! - `WiredTestPrep*`: prepared-transaction staging, runtime-only
//!
//! The crash simulator copies everything except runtime-only files, so the
//! distinction between durable and runtime state lives here and nowhere else.

use std::path::{Path, PathBuf};

/// Advisory lock file name. Held for the lifetime of a connection.
pub const LOCK_FILE: &str = "WiredTest.lock";

/// Metadata file name.
pub const META_FILE: &str = "WiredTest.meta";

/// The single log segment name.
pub const LOG_FILE: &str = "WiredTestLog.0000000001";

/// Suffix of checkpoint staging files.
pub const TMP_SUFFIX: &str = ".wttmp";

/// Prefix of prepared-transaction staging files.
pub const PREP_PREFIX: &str = "WiredTestPrep";

/// Suffix of table snapshot files.
pub const TABLE_SUFFIX: &str = ".wt";

/// True for files that represent runtime state rather than durable data.
///
/// An unclean shutdown may leave these behind; recovery recreates them, so
/// backup and crash-copy skip them.
pub fn is_runtime_file(name: &str) -> bool {
    name == LOCK_FILE || name.ends_with(TMP_SUFFIX) || name.starts_with(PREP_PREFIX)
}

/// Snapshot file name for a table.
pub fn table_file(table: &str) -> String {
    format!("{}{}", table, TABLE_SUFFIX)
}

/// Table name for a snapshot file name, if it is one.
pub fn table_for_file(file: &str) -> Option<&str> {
    file.strip_suffix(TABLE_SUFFIX)
}

/// Absolute path of a file inside a home directory.
pub fn home_path(home: &Path, name: &str) -> PathBuf {
    home.join(name)
}
