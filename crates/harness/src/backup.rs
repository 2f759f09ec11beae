//! Backup utilities shared by backup and restore tests
//!
//! Thin drivers over the engine's backup cursor protocol: full and
//! selective copies, log-only copies, and incremental copies patched from
//! `(offset, length, kind)` range entries. Copy failures are fatal and
//! leave whatever was copied so far in place for inspection.
//!
//! Incremental identifiers are rendered `ID<n>`; an incremental backup
//! with identifier `n` consumes the manifests registered under `n - 1`.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use wiredtest_core::{Error, Key, Result, Value};
use wiredtest_engine::{BackupCursor, Connection, Cursor, RangeEntry, RangeKind};

/// Render the incremental backup identifier for `n`.
pub fn backup_id(n: u32) -> String {
    format!("ID{}", n)
}

fn enumerate(cursor: &mut BackupCursor) -> Result<Vec<String>> {
    let mut files = Vec::new();
    while cursor.next()? {
        match cursor.get_key()? {
            Key::Str(name) => files.push(name),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unexpected backup cursor key {:?}",
                    other
                )))
            }
        }
    }
    Ok(files)
}

/// Copy every file a fresh backup cursor enumerates into `dest`.
///
/// Returns the copied file names in cursor order.
pub fn take_full_backup(conn: &Connection, dest: &Path) -> Result<Vec<String>> {
    let session = conn.open_session()?;
    let mut cursor = session.open_backup_cursor("")?;
    take_full_backup_with(conn, dest, &mut cursor)
}

/// [`take_full_backup`] over a caller-supplied cursor.
pub fn take_full_backup_with(
    conn: &Connection,
    dest: &Path,
    cursor: &mut BackupCursor,
) -> Result<Vec<String>> {
    fs::create_dir_all(dest)?;
    let files = enumerate(cursor)?;
    for name in &files {
        fs::copy(conn.home().join(name), dest.join(name))?;
    }
    tracing::debug!(dest = %dest.display(), files = files.len(), "full backup complete");
    Ok(files)
}

/// A full backup that omits `excluded` file names.
///
/// Used to verify that restore tolerates missing table files.
pub fn take_selective_backup(
    conn: &Connection,
    dest: &Path,
    excluded: &[&str],
) -> Result<Vec<String>> {
    fs::create_dir_all(dest)?;
    let session = conn.open_session()?;
    let mut cursor = session.open_backup_cursor("")?;
    let mut copied = Vec::new();
    for name in enumerate(&mut cursor)? {
        if excluded.contains(&name.as_str()) {
            continue;
        }
        fs::copy(conn.home().join(&name), dest.join(&name))?;
        copied.push(name);
    }
    Ok(copied)
}

/// Copy the log files of a log-only duplicate of `cursor` into `dest`.
///
/// The copied names are appended to `accumulator`, matching the way
/// repeated log backups build up a file list across a test.
pub fn take_log_backup(
    conn: &Connection,
    cursor: &BackupCursor,
    dest: &Path,
    accumulator: &mut Vec<String>,
) -> Result<()> {
    fs::create_dir_all(dest)?;
    for name in cursor.duplicate_log()? {
        fs::copy(conn.home().join(&name), dest.join(&name))?;
        if !accumulator.contains(&name) {
            accumulator.push(name);
        }
    }
    Ok(())
}

/// A full backup that also registers incremental manifests under id `n`.
///
/// The first backup of an incremental chain; later deltas come from
/// [`take_incr_backup`] with `n + 1`.
pub fn take_incr_full_backup(
    conn: &Connection,
    dest: &Path,
    n: u32,
    granularity: u64,
) -> Result<Vec<String>> {
    let session = conn.open_session()?;
    let mut cursor = session.open_backup_cursor(&format!(
        "incremental=(enabled,granularity={},this_id={})",
        granularity,
        backup_id(n)
    ))?;
    take_full_backup_with(conn, dest, &mut cursor)
}

/// What an incremental backup copied
#[derive(Debug)]
pub struct IncrementalBackup {
    /// Every file the cursor enumerated
    pub files: Vec<String>,
    /// The range entries applied, per file; unchanged files have none
    pub ranges: Vec<(String, Vec<RangeEntry>)>,
}

/// Copy the delta between backup ids `n - 1` and `n` into `dest`.
///
/// `dest` normally already holds the chain's previous state; whole-file
/// entries replace files, range entries patch them in place.
pub fn take_incr_backup(
    conn: &Connection,
    dest: &Path,
    n: u32,
    granularity: u64,
) -> Result<IncrementalBackup> {
    fs::create_dir_all(dest)?;
    let session = conn.open_session()?;
    let mut cursor = session.open_backup_cursor(&format!(
        "incremental=(enabled,granularity={},this_id={},src_id={})",
        granularity,
        backup_id(n),
        backup_id(n - 1)
    ))?;

    let files = enumerate(&mut cursor)?;
    let mut ranges = Vec::new();
    for name in &files {
        let entries = cursor.duplicate_ranges(name)?;
        for entry in &entries {
            match entry.kind {
                RangeKind::WholeFile => {
                    fs::copy(conn.home().join(name), dest.join(name))?;
                }
                RangeKind::Range => {
                    let data = fs::read(conn.home().join(name))?;
                    let start = entry.offset as usize;
                    let end = start + entry.length as usize;
                    let mut out = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .open(dest.join(name))?;
                    out.seek(SeekFrom::Start(entry.offset))?;
                    out.write_all(&data[start..end])?;
                }
            }
        }
        ranges.push((name.clone(), entries));
    }
    tracing::debug!(dest = %dest.display(), id = n, "incremental backup complete");
    Ok(IncrementalBackup { files, ranges })
}

/// Assert that `uri` holds the same (key, value) sequence in two homes.
///
/// # Errors
/// `Corruption` on the first differing position.
pub fn compare_backups(uri: &str, dir_a: &Path, dir_b: &Path) -> Result<()> {
    let conn_a = Connection::open(dir_a, "")?;
    let conn_b = Connection::open(dir_b, "")?;
    let session_a = conn_a.open_session()?;
    let session_b = conn_b.open_session()?;
    let mut cursor_a = session_a.open_cursor(uri, "")?;
    let mut cursor_b = session_b.open_cursor(uri, "")?;

    let mut position = 0u64;
    loop {
        let more_a = cursor_a.next()?;
        let more_b = cursor_b.next()?;
        if more_a != more_b {
            return Err(Error::Corruption(format!(
                "{}: {} has {} entries, the other more",
                uri,
                if more_a { dir_b.display() } else { dir_a.display() },
                position
            )));
        }
        if !more_a {
            break;
        }
        let (ka, va) = (cursor_a.get_key()?, cursor_a.get_value()?);
        let (kb, vb) = (cursor_b.get_key()?, cursor_b.get_value()?);
        if ka != kb || va != vb {
            return Err(Error::Corruption(format!(
                "{}: mismatch at position {}: ({:?}, {:?}) vs ({:?}, {:?})",
                uri, position, ka, kb, va, vb
            )));
        }
        position += 1;
    }

    drop(cursor_a);
    drop(cursor_b);
    drop(session_a);
    drop(session_b);
    conn_a.close()?;
    conn_b.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(conn: &Connection, key: &str, value: &str) {
        let session = conn.open_session().unwrap();
        let mut cursor = session.open_cursor("table:main", "").unwrap();
        cursor.set_key(Key::Str(key.to_string()));
        cursor.set_value(Value::Str(value.to_string()));
        cursor.insert().unwrap();
    }

    fn get(conn: &Connection, key: &str) -> Option<String> {
        let session = conn.open_session().unwrap();
        let mut cursor = session.open_cursor("table:main", "").unwrap();
        cursor.set_key(Key::Str(key.to_string()));
        if !cursor.search().unwrap() {
            return None;
        }
        match cursor.get_value().unwrap() {
            Value::Str(s) => Some(s),
            other => panic!("unexpected value {:?}", other),
        }
    }

    fn seed(home: &Path) -> Connection {
        let conn = Connection::open(home, "create").unwrap();
        let session = conn.open_session().unwrap();
        session
            .create("table:main", "key_format=S,value_format=S")
            .unwrap();
        drop(session);
        put(&conn, "a", "1");
        put(&conn, "b", "2");
        conn
    }

    #[test]
    fn test_full_backup_and_compare() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("backup");

        let conn = seed(&src);
        let files = take_full_backup(&conn, &dest).unwrap();
        assert!(files.contains(&"main.wt".to_string()));
        conn.close().unwrap();

        compare_backups("table:main", &src, &dest).unwrap();
    }

    #[test]
    fn test_compare_detects_divergence() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("backup");

        let conn = seed(&src);
        take_full_backup(&conn, &dest).unwrap();
        put(&conn, "c", "3");
        let session = conn.open_session().unwrap();
        session.checkpoint("").unwrap();
        drop(session);
        conn.close().unwrap();

        let err = compare_backups("table:main", &src, &dest).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_selective_backup_restores_without_table() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("backup");

        let conn = seed(&src);
        let copied = take_selective_backup(&conn, &dest, &["main.wt"]).unwrap();
        assert!(!copied.contains(&"main.wt".to_string()));
        conn.close().unwrap();

        // A missing snapshot file restores as an empty table.
        let restored = Connection::open(&dest, "").unwrap();
        assert_eq!(get(&restored, "a"), None);
        restored.close().unwrap();
    }

    #[test]
    fn test_incremental_chain() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("backup");

        let conn = seed(&src);
        let full = take_incr_full_backup(&conn, &dest, 1, 64).unwrap();
        put(&conn, "c", "3");

        let incr = take_incr_backup(&conn, &dest, 2, 64).unwrap();
        // Enumerated files stay within the original set plus dirtied ones.
        for (file, _) in &incr.ranges {
            assert!(incr.files.contains(file));
        }
        assert!(full.iter().all(|f| incr.files.contains(f)));
        conn.close().unwrap();

        compare_backups("table:main", &src, &dest).unwrap();
        let restored = Connection::open(&dest, "").unwrap();
        assert_eq!(get(&restored, "c").as_deref(), Some("3"));
        restored.close().unwrap();
    }

    #[test]
    fn test_log_backup_copies_log_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("logs");

        let conn = Connection::open(&src, "create,log=(enabled)").unwrap();
        let session = conn.open_session().unwrap();
        session
            .create("table:main", "key_format=S,value_format=S")
            .unwrap();
        drop(session);
        put(&conn, "a", "1");

        let session = conn.open_session().unwrap();
        let cursor = session.open_backup_cursor("").unwrap();
        let mut acc = Vec::new();
        take_log_backup(&conn, &cursor, &dest, &mut acc).unwrap();
        assert_eq!(acc.len(), 1);
        assert!(dest.join(&acc[0]).exists());
        drop(cursor);
        drop(session);
        conn.close().unwrap();
    }
}
