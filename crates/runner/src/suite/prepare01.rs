//! Prepared transactions: conflict, ignore_prepare, and commit.

use wiredtest_core::{timestamp_str, Error, Key, Result, Value};
use wiredtest_harness::case::{default_conn_config, no_scenarios, TestContext, TestDef};

pub fn tests() -> Vec<TestDef> {
    vec![TestDef {
        name: "prepare01",
        conn_config: default_conn_config,
        scenarios: no_scenarios,
        body,
        tags: &["prepare", "txn"],
        skip_for_hooks: &[],
    }]
}

const URI: &str = "table:prepare01";
const PREPARE_TS: u64 = 10;

fn check(condition: bool, what: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::Corruption(what.to_string()))
    }
}

fn body(ctx: &mut TestContext) -> Result<()> {
    let session = ctx.session()?;
    session.create(URI, "key_format=S,value_format=S")?;

    session.begin_transaction("")?;
    {
        let mut cursor = session.open_cursor(URI, "")?;
        cursor.set_key(Key::Str("k".to_string()));
        cursor.set_value(Value::Str("prepared".to_string()));
        cursor.insert()?;
    }
    session.prepare_transaction(&format!(
        "prepare_timestamp={}",
        timestamp_str(PREPARE_TS)
    ))?;

    // A reader at the prepare timestamp hits the prepared update.
    let reader = ctx.conn()?.open_session()?;
    reader.begin_transaction(&format!(
        "read_timestamp={}",
        timestamp_str(PREPARE_TS)
    ))?;
    {
        let mut cursor = reader.open_cursor(URI, "")?;
        cursor.set_key(Key::Str("k".to_string()));
        check(
            matches!(cursor.search(), Err(Error::PrepareConflict)),
            "prepared update did not conflict",
        )?;
    }
    reader.rollback_transaction("")?;

    // ignore_prepare reads past it.
    reader.begin_transaction(&format!(
        "read_timestamp={},ignore_prepare=true",
        timestamp_str(PREPARE_TS)
    ))?;
    {
        let mut cursor = reader.open_cursor(URI, "")?;
        cursor.set_key(Key::Str("k".to_string()));
        check(!cursor.search()?, "ignore_prepare saw the prepared update")?;
    }
    reader.rollback_transaction("")?;

    // Readers below the prepare timestamp never conflict.
    reader.begin_transaction(&format!(
        "read_timestamp={}",
        timestamp_str(PREPARE_TS - 1)
    ))?;
    {
        let mut cursor = reader.open_cursor(URI, "")?;
        cursor.set_key(Key::Str("k".to_string()));
        check(!cursor.search()?, "early reader saw the prepared update")?;
    }
    reader.rollback_transaction("")?;

    session.commit_transaction(&format!(
        "commit_timestamp={},durable_timestamp={}",
        timestamp_str(PREPARE_TS),
        timestamp_str(PREPARE_TS)
    ))?;

    // Committed, the update is plainly visible at its timestamp.
    reader.begin_transaction(&format!(
        "read_timestamp={}",
        timestamp_str(PREPARE_TS)
    ))?;
    {
        let mut cursor = reader.open_cursor(URI, "")?;
        cursor.set_key(Key::Str("k".to_string()));
        check(cursor.search()?, "committed update invisible")?;
        check(
            cursor.get_value()? == Value::Str("prepared".to_string()),
            "committed value wrong",
        )?;
    }
    reader.rollback_transaction("")?;
    reader.close()?;
    Ok(())
}
