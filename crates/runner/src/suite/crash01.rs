//! Crash and recovery: logged updates survive an unclean shutdown.

use wiredtest_core::{Error, Key, Result, Value};
use wiredtest_harness::case::{no_scenarios, TestContext, TestDef};
use wiredtest_harness::scenario::Scenario;

pub fn tests() -> Vec<TestDef> {
    vec![TestDef {
        name: "crash01",
        conn_config,
        scenarios: no_scenarios,
        body,
        tags: &["crash", "log"],
        skip_for_hooks: &[],
    }]
}

fn conn_config(_scenario: &Scenario) -> String {
    "log=(enabled)".to_string()
}

const URI: &str = "table:crash01";
const NROWS: u64 = 10;

fn insert(ctx: &TestContext, key: String, value: String) -> Result<()> {
    let mut cursor = ctx.session()?.open_cursor(URI, "")?;
    cursor.set_key(Key::Str(key));
    cursor.set_value(Value::Str(value));
    cursor.insert()
}

fn body(ctx: &mut TestContext) -> Result<()> {
    ctx.session()?
        .create(URI, "key_format=S,value_format=S,log=(enabled)")?;

    for i in 0..NROWS {
        insert(ctx, format!("before{:03}", i), format!("{}", i))?;
    }
    ctx.session()?.checkpoint("")?;
    // Past the checkpoint, durable only through the log.
    for i in 0..NROWS {
        insert(ctx, format!("after{:03}", i), format!("{}", i))?;
    }

    ctx.simulate_crash_restart("RESTART")?;

    let mut cursor = ctx.session()?.open_cursor(URI, "")?;
    let mut rows = 0u64;
    while cursor.next()? {
        rows += 1;
    }
    if rows != 2 * NROWS {
        return Err(Error::Corruption(format!(
            "recovered {} rows, expected {}",
            rows,
            2 * NROWS
        )));
    }
    Ok(())
}
