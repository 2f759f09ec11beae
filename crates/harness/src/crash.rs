//! Simulated crash and restart
//!
//! An unclean shutdown leaves the durable files of the last checkpoint and
//! log flush, plus runtime droppings the engine recreates on open. The
//! simulator reproduces that state by copying a live home directory while
//! its connection is still open, skipping runtime-only files, then opening
//! the copy under recovery.

use std::fs;
use std::path::Path;

use wiredtest_core::{Error, Result};
use wiredtest_engine::layout::is_runtime_file;
use wiredtest_engine::Connection;

/// Copy the durable files of a live database directory.
///
/// `dst` is created; every regular file of `src` except runtime-only ones
/// is copied byte-for-byte. Subdirectories are not part of an engine home
/// and are skipped. Returns the copied file names in lexical order.
///
/// # Errors
/// `InvalidArgument` when `dst` already exists, I/O errors otherwise.
pub fn copy_for_crash(src: &Path, dst: &Path) -> Result<Vec<String>> {
    if dst.exists() {
        return Err(Error::InvalidArgument(format!(
            "crash target {} already exists",
            dst.display()
        )));
    }
    fs::create_dir_all(dst)?;

    let mut copied = Vec::new();
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_runtime_file(&name) {
            continue;
        }
        fs::copy(entry.path(), dst.join(&name))?;
        copied.push(name);
    }
    copied.sort();
    tracing::debug!(src = %src.display(), dst = %dst.display(), files = copied.len(), "crash copy complete");
    Ok(copied)
}

/// Simulate a crash of the connection open at `src` and restart at `dst`.
///
/// The copy happens first, while the connection is live, so the copy sees
/// exactly the durable state an unclean shutdown would leave. The source
/// connection is then closed without a final checkpoint and a new
/// connection is opened on the copy, which runs recovery.
pub fn simulate_crash_restart(
    conn: Connection,
    src: &Path,
    dst: &Path,
    config: &str,
) -> Result<Connection> {
    copy_for_crash(src, dst)?;
    // Dropping without close() skips the shutdown checkpoint.
    drop(conn);
    Connection::open(dst, config)
}
