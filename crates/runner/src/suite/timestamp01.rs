//! Timestamped visibility and rollback-to-stable.

use wiredtest_core::{timestamp_str, Error, Key, Result, Value};
use wiredtest_harness::case::{default_conn_config, no_scenarios, TestContext, TestDef};

pub fn tests() -> Vec<TestDef> {
    vec![TestDef {
        name: "timestamp01",
        conn_config: default_conn_config,
        scenarios: no_scenarios,
        body,
        tags: &["timestamp"],
        skip_for_hooks: &[("timestamp", "sets its own commit timestamps")],
    }]
}

const URI: &str = "table:timestamp01";

fn put_at(ctx: &TestContext, key: &str, value: &str, ts: u64) -> Result<()> {
    let session = ctx.session()?;
    session.begin_transaction("")?;
    let mut cursor = session.open_cursor(URI, "")?;
    cursor.set_key(Key::Str(key.to_string()));
    cursor.set_value(Value::Str(value.to_string()));
    cursor.insert()?;
    drop(cursor);
    session.commit_transaction(&format!("commit_timestamp={}", timestamp_str(ts)))
}

fn read_at(ctx: &TestContext, key: &str, ts: u64) -> Result<Option<String>> {
    let session = ctx.session()?;
    session.begin_transaction(&format!("read_timestamp={}", timestamp_str(ts)))?;
    let mut cursor = session.open_cursor(URI, "")?;
    cursor.set_key(Key::Str(key.to_string()));
    let result = if cursor.search()? {
        match cursor.get_value()? {
            Value::Str(s) => Some(s),
            other => {
                return Err(Error::Corruption(format!(
                    "unexpected value {:?}",
                    other
                )))
            }
        }
    } else {
        None
    };
    drop(cursor);
    session.rollback_transaction("")?;
    Ok(result)
}

fn check(condition: bool, what: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::Corruption(what.to_string()))
    }
}

fn body(ctx: &mut TestContext) -> Result<()> {
    ctx.session()?.create(URI, "key_format=S,value_format=S")?;

    put_at(ctx, "k", "old", 10)?;
    put_at(ctx, "k", "new", 20)?;

    // Reads honor the read timestamp.
    check(read_at(ctx, "k", 10)?.as_deref() == Some("old"), "read at 10")?;
    check(read_at(ctx, "k", 15)?.as_deref() == Some("old"), "read at 15")?;
    check(read_at(ctx, "k", 20)?.as_deref() == Some("new"), "read at 20")?;

    let conn = ctx.conn()?;
    conn.set_timestamp(&format!(
        "oldest_timestamp={},stable_timestamp={}",
        timestamp_str(10),
        timestamp_str(15)
    ))?;
    check(
        conn.query_timestamp("get=stable")? == timestamp_str(15),
        "stable readback",
    )?;

    // Stable may not move backward.
    let err = conn.set_timestamp(&format!("stable_timestamp={}", timestamp_str(5)));
    check(
        matches!(err, Err(Error::InvalidArgument(_))),
        "backward stable accepted",
    )?;

    // Rollback-to-stable discards the commit at 20 but keeps the one at 10.
    let discarded = ctx.conn()?.rollback_to_stable("")?;
    check(discarded >= 1, "nothing discarded")?;
    check(
        read_at(ctx, "k", 20)?.as_deref() == Some("old"),
        "rollback to stable kept the unstable commit",
    )?;

    // Still true after recovery.
    ctx.session()?.checkpoint("")?;
    ctx.reopen_conn()?;
    check(
        read_at(ctx, "k", 20)?.as_deref() == Some("old"),
        "unstable commit resurfaced after reopen",
    )?;
    Ok(())
}
