//! Run reporting
//!
//! One line per verdict into `<parent>/results.txt`, a console summary,
//! and the process exit code: 0 when everything passed or was skipped,
//! 1 when anything failed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use wiredtest_core::Result;
use wiredtest_harness::case::{TestOutcome, Verdict};

/// Verdict counts for one run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Instances run or skipped.
    pub total: usize,
    /// Passing instances.
    pub passed: usize,
    /// Failing instances, timeouts included.
    pub failed: usize,
    /// Skipped instances.
    pub skipped: usize,
}

/// Tally the outcomes.
pub fn summarize(outcomes: &[TestOutcome]) -> Summary {
    let mut summary = Summary {
        total: outcomes.len(),
        ..Summary::default()
    };
    for outcome in outcomes {
        match outcome.verdict {
            Verdict::Pass => summary.passed += 1,
            Verdict::Fail => summary.failed += 1,
            Verdict::Skip => summary.skipped += 1,
        }
    }
    summary
}

/// Exit code for the run: 0 iff nothing failed.
pub fn exit_code(summary: &Summary) -> i32 {
    if summary.failed == 0 {
        0
    } else {
        1
    }
}

/// The parent directory for a run rooted at `base`.
///
/// `WT_TEST` by default; `WT_TEST.YYYYMMDD-HHMMSS` in timestamped mode,
/// which never collides with an earlier run worth keeping.
pub fn parent_dir(base: &Path, timestamped: bool) -> PathBuf {
    if timestamped {
        base.join(format!(
            "WT_TEST.{}",
            Local::now().format("%Y%m%d-%H%M%S")
        ))
    } else {
        base.join("WT_TEST")
    }
}

/// Render one outcome the way `results.txt` and the console show it.
pub fn format_outcome(outcome: &TestOutcome) -> String {
    let mut line = format!(
        "{:4}  {} ({:.2}s)",
        outcome.verdict.to_string(),
        outcome.name,
        outcome.duration.as_secs_f64()
    );
    if let Some(message) = &outcome.message {
        line.push_str(": ");
        line.push_str(message);
    }
    if let Some(dir) = &outcome.preserved_dir {
        line.push_str(&format!(" [dir {}]", dir.display()));
    }
    line
}

/// Write `<parent>/results.txt`: every verdict line plus the summary.
pub fn write_results(parent: &Path, outcomes: &[TestOutcome]) -> Result<PathBuf> {
    let path = parent.join("results.txt");
    let mut file = fs::File::create(&path)?;
    for outcome in outcomes {
        writeln!(file, "{}", format_outcome(outcome))?;
    }
    writeln!(file, "{}", format_summary(&summarize(outcomes)))?;
    Ok(path)
}

/// The one-line run summary.
pub fn format_summary(summary: &Summary) -> String {
    format!(
        "{} tests: {} passed, {} failed, {} skipped",
        summary.total, summary.passed, summary.failed, summary.skipped
    )
}
