//! Create, populate, and verify a table across key and value formats.

use wiredtest_core::Result;
use wiredtest_harness::case::{default_conn_config, TestContext, TestDef};
use wiredtest_harness::dataset::SimpleDataSet;
use wiredtest_harness::scenario::{quick, Scenario};

use super::product;

pub fn tests() -> Vec<TestDef> {
    vec![TestDef {
        name: "base01",
        conn_config: default_conn_config,
        scenarios,
        body,
        tags: &["base"],
        skip_for_hooks: &[],
    }]
}

fn scenarios() -> Vec<Scenario> {
    let keys = quick(
        "key_format",
        &[("row", "S".into()), ("int", "i".into()), ("rec", "r".into())],
    );
    let values = quick(
        "value_format",
        &[("str", "S".into()), ("int", "i".into()), ("fix", "8t".into())],
    );
    product(&[&keys, &values])
}

fn body(ctx: &mut TestContext) -> Result<()> {
    let ds = SimpleDataSet::from_scenario(ctx.scenario(), "table:base01", 100)?;
    ds.populate(ctx.session()?)?;
    ds.check(ctx.session()?)?;
    ctx.verify_until_success(ds.uri())?;

    // Still intact after a checkpoint and reopen.
    ctx.session()?.checkpoint("")?;
    ctx.reopen_conn()?;
    ds.check(ctx.session()?)?;

    ctx.emit(format!("rows verified: {}", ds.nrows()));
    ctx.expect_output("rows verified: [0-9]+")?;
    Ok(())
}
