//! Incremental backup chains.

use wiredtest_core::{Error, Result};
use wiredtest_harness::backup::{compare_backups, take_incr_backup, take_incr_full_backup};
use wiredtest_harness::case::{default_conn_config, TestContext, TestDef};
use wiredtest_harness::dataset::SimpleDataSet;
use wiredtest_harness::scenario::{quick, Scenario};

pub fn tests() -> Vec<TestDef> {
    vec![TestDef {
        name: "backup02",
        conn_config: default_conn_config,
        scenarios,
        body,
        tags: &["backup"],
        skip_for_hooks: &[],
    }]
}

fn scenarios() -> Vec<Scenario> {
    quick(
        "granularity",
        &[
            ("small_blocks", 256i64.into()),
            ("large_blocks", 16384i64.into()),
        ],
    )
}

fn body(ctx: &mut TestContext) -> Result<()> {
    let granularity = ctx.scenario().i64_param("granularity")? as u64;
    let ds = SimpleDataSet::new("table:backup02", 100);
    ds.populate(ctx.session()?)?;
    ctx.session()?.checkpoint("")?;

    let dest = ctx.home().join("BACKUP");
    take_incr_full_backup(ctx.conn()?, &dest, 1, granularity)?;

    // Grow the table, then ship only the delta.
    {
        let session = ctx.session()?;
        let mut cursor = session.open_cursor(ds.uri(), "")?;
        for i in 101..=120u64 {
            cursor.set_key(ds.key(i));
            cursor.set_value(ds.value(i));
            cursor.insert()?;
        }
    }
    ctx.session()?.checkpoint("")?;
    let incr = take_incr_backup(ctx.conn()?, &dest, 2, granularity)?;

    // Every patched file was enumerated by the cursor.
    for (file, _) in &incr.ranges {
        if !incr.files.contains(file) {
            return Err(Error::Corruption(format!(
                "{} patched but never enumerated",
                file
            )));
        }
    }

    // The chain's copy matches the source, grown rows included.
    let source = ctx.conn_home().to_path_buf();
    ctx.close_conn()?;
    compare_backups(ds.uri(), &source, &dest)?;
    Ok(())
}
