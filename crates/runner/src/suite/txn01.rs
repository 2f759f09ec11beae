//! Transaction visibility: commits stay, rollbacks vanish.

use wiredtest_core::{Error, Key, Result, Value};
use wiredtest_harness::case::{default_conn_config, no_scenarios, TestContext, TestDef};
use wiredtest_harness::txn::with_transaction;

pub fn tests() -> Vec<TestDef> {
    vec![TestDef {
        name: "txn01",
        conn_config: default_conn_config,
        scenarios: no_scenarios,
        body,
        tags: &["txn"],
        skip_for_hooks: &[],
    }]
}

const URI: &str = "table:txn01";

fn found(ctx: &TestContext, key: &str) -> Result<bool> {
    let mut cursor = ctx.session()?.open_cursor(URI, "")?;
    cursor.set_key(Key::Str(key.to_string()));
    cursor.search()
}

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

    with_transaction(session, ctx.clock(), |s| {
        let mut cursor = s.open_cursor(URI, "")?;
        cursor.set_key(Key::Str("committed".to_string()));
        cursor.set_value(Value::Str("1".to_string()));
        cursor.insert()
    })?;

    session.begin_transaction("")?;
    {
        let mut cursor = session.open_cursor(URI, "")?;
        cursor.set_key(Key::Str("rolled_back".to_string()));
        cursor.set_value(Value::Str("2".to_string()));
        cursor.insert()?;
        // The write is visible to its own transaction before the rollback.
        cursor.reset()?;
        cursor.set_key(Key::Str("rolled_back".to_string()));
        check(cursor.search()?, "own write invisible inside the transaction")?;
    }
    session.rollback_transaction("")?;

    check(found(ctx, "committed")?, "committed row lost")?;
    check(!found(ctx, "rolled_back")?, "rolled back row survived")?;

    // A body error inside the scoped helper rolls back too.
    let induced = with_transaction(ctx.session()?, ctx.clock(), |s| {
        let mut cursor = s.open_cursor(URI, "")?;
        cursor.set_key(Key::Str("aborted".to_string()));
        cursor.set_value(Value::Str("3".to_string()));
        cursor.insert()?;
        Err::<(), _>(Error::Rollback {
            reason: "induced".to_string(),
        })
    });
    check(induced.is_err(), "induced error did not propagate")?;
    check(!found(ctx, "aborted")?, "aborted row survived")?;
    Ok(())
}
