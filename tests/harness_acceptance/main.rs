//! End-to-end acceptance scenarios for the harness and engine together,
//! driven through the root facade the way an embedding test suite would.

use tempfile::TempDir;

use wiredtest::engine::Connection;
use wiredtest::harness::backup::{take_full_backup, take_incr_backup, take_incr_full_backup};
use wiredtest::harness::crash::simulate_crash_restart;
use wiredtest::harness::scenario::{multiply, prune, quick, ParamValue, Scenario};
use wiredtest::{timestamp_str, Error, Key, Value};

const URI: &str = "table:t";

fn create(conn: &Connection) {
    let session = conn.open_session().unwrap();
    session.create(URI, "key_format=S,value_format=S").unwrap();
}

fn put(conn: &Connection, key: &str, value: &str) {
    let session = conn.open_session().unwrap();
    let mut cursor = session.open_cursor(URI, "").unwrap();
    cursor.set_key(Key::Str(key.to_string()));
    cursor.set_value(Value::Str(value.to_string()));
    cursor.insert().unwrap();
}

fn put_at(conn: &Connection, key: &str, value: &str, ts: u64) {
    let session = conn.open_session().unwrap();
    session.begin_transaction("").unwrap();
    let mut cursor = session.open_cursor(URI, "").unwrap();
    cursor.set_key(Key::Str(key.to_string()));
    cursor.set_value(Value::Str(value.to_string()));
    cursor.insert().unwrap();
    drop(cursor);
    session
        .commit_transaction(&format!("commit_timestamp={}", timestamp_str(ts)))
        .unwrap();
}

fn get_at(conn: &Connection, key: &str, ts: u64) -> Option<String> {
    let session = conn.open_session().unwrap();
    session
        .begin_transaction(&format!("read_timestamp={}", timestamp_str(ts)))
        .unwrap();
    let mut cursor = session.open_cursor(URI, "").unwrap();
    cursor.set_key(Key::Str(key.to_string()));
    let result = if cursor.search().unwrap() {
        match cursor.get_value().unwrap() {
            Value::Str(s) => Some(s),
            other => panic!("unexpected value {:?}", other),
        }
    } else {
        None
    };
    drop(cursor);
    session.rollback_transaction("").unwrap();
    result
}

#[test]
fn test_basic_create_and_read() {
    let dir = TempDir::new().unwrap();
    let conn = Connection::open(dir.path(), "create").unwrap();
    create(&conn);
    put(&conn, "k", "v");

    // A second cursor positioned at the key sees the value.
    let session = conn.open_session().unwrap();
    let mut cursor = session.open_cursor(URI, "").unwrap();
    cursor.set_key(Key::Str("k".to_string()));
    assert!(cursor.search().unwrap());
    assert_eq!(cursor.get_value().unwrap(), Value::Str("v".to_string()));
    drop(cursor);
    drop(session);
    conn.close().unwrap();
}

#[test]
fn test_timestamped_visibility_and_rollback_to_stable() {
    // With stable below both commits, rollback-to-stable erases them.
    let dir = TempDir::new().unwrap();
    let conn = Connection::open(dir.path().join("erase"), "create").unwrap();
    create(&conn);
    put_at(&conn, "k", "a", 10);
    put_at(&conn, "k", "b", 20);
    conn.set_timestamp(&format!("stable_timestamp={}", timestamp_str(5)))
        .unwrap();
    assert!(conn.rollback_to_stable("").unwrap() >= 2);
    assert_eq!(get_at(&conn, "k", 25), None);
    conn.close().unwrap();

    // With stable above the first commit, reads split at the timestamps.
    let conn = Connection::open(dir.path().join("reads"), "create").unwrap();
    create(&conn);
    put_at(&conn, "k", "a", 10);
    put_at(&conn, "k", "b", 20);
    conn.set_timestamp(&format!(
        "oldest_timestamp={},stable_timestamp={}",
        timestamp_str(1),
        timestamp_str(15)
    ))
    .unwrap();
    assert_eq!(get_at(&conn, "k", 12).as_deref(), Some("a"));
    assert_eq!(get_at(&conn, "k", 25).as_deref(), Some("b"));
    conn.close().unwrap();
}

#[test]
fn test_prepared_conflict_and_ignore_prepare() {
    let dir = TempDir::new().unwrap();
    let conn = Connection::open(dir.path(), "create").unwrap();
    create(&conn);
    put_at(&conn, "k", "a", 10);

    let writer = conn.open_session().unwrap();
    writer.begin_transaction("").unwrap();
    {
        let mut cursor = writer.open_cursor(URI, "").unwrap();
        cursor.set_key(Key::Str("k".to_string()));
        cursor.set_value(Value::Str("b".to_string()));
        cursor.update().unwrap();
    }
    writer
        .prepare_transaction(&format!("prepare_timestamp={}", timestamp_str(20)))
        .unwrap();

    let reader = conn.open_session().unwrap();
    reader
        .begin_transaction(&format!("read_timestamp={}", timestamp_str(25)))
        .unwrap();
    {
        let mut cursor = reader.open_cursor(URI, "").unwrap();
        cursor.set_key(Key::Str("k".to_string()));
        assert!(matches!(cursor.search(), Err(Error::PrepareConflict)));
    }
    reader.rollback_transaction("").unwrap();

    // ignore_prepare reads past the prepared update to the original.
    reader
        .begin_transaction(&format!(
            "read_timestamp={},ignore_prepare=true",
            timestamp_str(25)
        ))
        .unwrap();
    {
        let mut cursor = reader.open_cursor(URI, "").unwrap();
        cursor.set_key(Key::Str("k".to_string()));
        assert!(cursor.search().unwrap());
        assert_eq!(cursor.get_value().unwrap(), Value::Str("a".to_string()));
    }
    reader.rollback_transaction("").unwrap();

    writer.rollback_transaction("").unwrap();
    drop(writer);
    drop(reader);
    conn.close().unwrap();
}

#[test]
fn test_crash_recovery_keeps_all_keys() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let config = "log=(enabled)";
    let conn = Connection::open(&src, "create,log=(enabled)").unwrap();
    let session = conn.open_session().unwrap();
    session
        .create(URI, "key_format=S,value_format=S,log=(enabled)")
        .unwrap();
    drop(session);

    for i in 0..10 {
        put(&conn, &format!("checkpointed{:02}", i), "1");
    }
    let session = conn.open_session().unwrap();
    session.checkpoint("").unwrap();
    drop(session);
    for i in 0..10 {
        put(&conn, &format!("logged{:02}", i), "2");
    }

    let restarted =
        simulate_crash_restart(conn, &src, &dir.path().join("RESTART"), config).unwrap();
    let session = restarted.open_session().unwrap();
    let mut cursor = session.open_cursor(URI, "").unwrap();
    let mut rows = 0;
    while cursor.next().unwrap() {
        rows += 1;
    }
    assert_eq!(rows, 20);
    drop(cursor);
    drop(session);
    restarted.close().unwrap();
}

#[test]
fn test_incremental_backup_chain() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let dest = dir.path().join("backup");
    let conn = Connection::open(&src, "create").unwrap();
    create(&conn);
    for i in 0..50 {
        put(&conn, &format!("k{:03}", i), "1");
    }
    let full = take_incr_full_backup(&conn, &dest, 1, 256).unwrap();

    for i in 50..80 {
        put(&conn, &format!("k{:03}", i), "2");
    }
    let incr = take_incr_backup(&conn, &dest, 2, 256).unwrap();
    conn.close().unwrap();

    // Enumerated files stay within the first backup plus dirtied files.
    let dirtied: Vec<&String> = incr
        .ranges
        .iter()
        .filter(|(_, entries)| !entries.is_empty())
        .map(|(file, _)| file)
        .collect();
    for file in &incr.files {
        assert!(
            full.contains(file) || dirtied.contains(&file),
            "{} neither in the full backup nor dirtied",
            file
        );
    }

    // The destination reopens with the post-update data.
    let restored = Connection::open(&dest, "").unwrap();
    let session = restored.open_session().unwrap();
    let mut cursor = session.open_cursor(URI, "").unwrap();
    cursor.set_key(Key::Str("k079".to_string()));
    assert!(cursor.search().unwrap());
    assert_eq!(cursor.get_value().unwrap(), Value::Str("2".to_string()));
    drop(cursor);
    drop(session);
    restored.close().unwrap();
}

#[test]
fn test_full_backup_matches_source() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let dest = dir.path().join("backup");
    let conn = Connection::open(&src, "create").unwrap();
    create(&conn);
    for i in 0..20 {
        put(&conn, &format!("k{:02}", i), "v");
    }
    take_full_backup(&conn, &dest).unwrap();
    // Changes after the backup cursor opened stay out of the copy.
    put(&conn, "straggler", "x");
    conn.close().unwrap();

    let restored = Connection::open(&dest, "").unwrap();
    let session = restored.open_session().unwrap();
    let mut cursor = session.open_cursor(URI, "").unwrap();
    cursor.set_key(Key::Str("straggler".to_string()));
    assert!(!cursor.search().unwrap());
    cursor.reset().unwrap();
    let mut rows = 0;
    while cursor.next().unwrap() {
        rows += 1;
    }
    assert_eq!(rows, 20);
    drop(cursor);
    drop(session);
    restored.close().unwrap();
}

#[test]
fn test_scenario_pruning_is_deterministic() {
    fn axis(name: &str) -> Vec<Scenario> {
        let ids: Vec<String> = (0..10).map(|i| format!("{}{}", name, i)).collect();
        let pairs: Vec<(&str, ParamValue)> = ids
            .iter()
            .zip(0i64..)
            .map(|(id, i)| (id.as_str(), i.into()))
            .collect();
        quick(name, &pairs)
    }
    let expand = || {
        let product =
            multiply(".", &[&axis("a"), &axis("b"), &axis("c")]).unwrap();
        assert_eq!(product.len(), 1000);
        prune(product, 100, Some(42))
    };

    let first = expand();
    let second = expand();
    assert_eq!(first.len(), 100);
    let ids = |list: &[Scenario]| -> Vec<String> {
        list.iter().map(|s| s.id().to_string()).collect()
    };
    assert_eq!(ids(&first), ids(&second));
}
