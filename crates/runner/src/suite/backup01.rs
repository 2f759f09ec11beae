//! Full backup: copy, reopen, and compare against the source.

use wiredtest_core::Result;
use wiredtest_engine::Connection;
use wiredtest_harness::backup::{compare_backups, take_full_backup, take_selective_backup};
use wiredtest_harness::case::{default_conn_config, no_scenarios, TestContext, TestDef};
use wiredtest_harness::dataset::SimpleDataSet;

pub fn tests() -> Vec<TestDef> {
    vec![TestDef {
        name: "backup01",
        conn_config: default_conn_config,
        scenarios: no_scenarios,
        body,
        tags: &["backup"],
        skip_for_hooks: &[],
    }]
}

fn body(ctx: &mut TestContext) -> Result<()> {
    let ds = SimpleDataSet::new("table:backup01", 200);
    ds.populate(ctx.session()?)?;
    ctx.session()?.checkpoint("")?;

    let full_dir = ctx.home().join("BACKUP");
    let files = take_full_backup(ctx.conn()?, &full_dir)?;
    ctx.emit(format!("backup copied {} files", files.len()));
    ctx.expect_output("backup copied [0-9]+ files")?;

    // A second copy without the table's snapshot restores empty.
    let partial_dir = ctx.home().join("PARTIAL");
    take_selective_backup(ctx.conn()?, &partial_dir, &["backup01.wt"])?;

    // Comparing needs both directories unlocked.
    let source = ctx.conn_home().to_path_buf();
    ctx.close_conn()?;
    compare_backups(ds.uri(), &source, &full_dir)?;

    // The partial copy still opens; the missing table restores empty.
    let partial = Connection::open(&partial_dir, "")?;
    partial.close()?;
    Ok(())
}
