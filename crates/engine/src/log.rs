//! Write-ahead log records and file operations
//!
//! The log is an append-only file of framed records, one record per
//! committed transaction that touched a logged table:
//!
//! ```text
//! [length: u32 LE][crc32: u32 LE][payload: bincode LogRecord]
//! ```
//!
//! - length covers the payload only
//! - crc32 is computed over the payload, detecting torn and corrupt frames
//!
//! A torn frame at end of file is the expected remnant of a crash and is
//! silently discarded by the reader. A bad checksum anywhere before that is
//! corruption and fails recovery.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use wiredtest_core::{Error, Key, Result, Timestamp, Value};

/// A single logged operation inside a transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogOp {
    /// A key was written with a value.
    Put {
        /// Table name (without the `table:` prefix)
        table: String,
        /// Key written
        key: Key,
        /// Value written
        value: Value,
    },
    /// A key was removed.
    Remove {
        /// Table name (without the `table:` prefix)
        table: String,
        /// Key removed
        key: Key,
    },
}

impl LogOp {
    /// The table this operation applies to.
    pub fn table(&self) -> &str {
        match self {
            LogOp::Put { table, .. } => table,
            LogOp::Remove { table, .. } => table,
        }
    }
}

/// One committed transaction's worth of logged operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Log sequence number, strictly increasing per record
    pub lsn: u64,
    /// Commit timestamp, `Timestamp::NONE` for untimestamped commits
    pub commit_ts: Timestamp,
    /// Durable timestamp, `Timestamp::NONE` for untimestamped commits
    pub durable_ts: Timestamp,
    /// Operations in commit order
    pub ops: Vec<LogOp>,
}

fn frame(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Append-only log writer
///
/// Every append is flushed and synced before returning: a record that the
/// engine reported committed must survive the crash simulator's copy.
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogWriter {
    /// Open the log at `path`, creating it if absent, positioned for append.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(LogWriter {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    /// Append one record and force it to disk.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let buf = frame(record)?;
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        self.writer.get_mut().sync_data()?;
        Ok(())
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every complete record from the log at `path`.
///
/// Missing file means an empty log. A partial frame at end of file is
/// discarded; a checksum mismatch before that returns `Corruption`.
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < 8 {
            // Torn header at end of file.
            break;
        }
        let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().unwrap());
        let start = pos + 8;
        if data.len() - start < len {
            // Torn payload at end of file.
            break;
        }
        let payload = &data[start..start + len];
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != crc {
            return Err(Error::Corruption(format!(
                "log record checksum mismatch at offset {}",
                pos
            )));
        }
        let record: LogRecord = bincode::deserialize(payload)?;
        records.push(record);
        pos = start + len;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(lsn: u64) -> LogRecord {
        LogRecord {
            lsn,
            commit_ts: Timestamp::new(lsn * 10),
            durable_ts: Timestamp::new(lsn * 10),
            ops: vec![
                LogOp::Put {
                    table: "t".to_string(),
                    key: Key::Str(format!("key{}", lsn)),
                    value: Value::Str(format!("value{}", lsn)),
                },
                LogOp::Remove {
                    table: "t".to_string(),
                    key: Key::Str("old".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("WiredTestLog.0000000001");

        let mut writer = LogWriter::open(&path).unwrap();
        writer.append(&record(1)).unwrap();
        writer.append(&record(2)).unwrap();
        drop(writer);

        let records = read_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record(1));
        assert_eq!(records[1], record(2));
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let records = read_log(&dir.path().join("absent")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_append_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");

        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&record(1)).unwrap();
        }
        {
            let mut writer = LogWriter::open(&path).unwrap();
            writer.append(&record(2)).unwrap();
        }

        let records = read_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].lsn, 2);
    }

    #[test]
    fn test_torn_tail_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");

        let mut writer = LogWriter::open(&path).unwrap();
        writer.append(&record(1)).unwrap();
        writer.append(&record(2)).unwrap();
        drop(writer);

        // Chop bytes off the final frame to simulate a torn write.
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 3]).unwrap();

        let records = read_log(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lsn, 1);
    }

    #[test]
    fn test_mid_file_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");

        let mut writer = LogWriter::open(&path).unwrap();
        writer.append(&record(1)).unwrap();
        writer.append(&record(2)).unwrap();
        drop(writer);

        // Flip a payload byte inside the first frame.
        let mut data = std::fs::read(&path).unwrap();
        data[10] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        let err = read_log(&path).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }
}
