//! `wtrun` — scenario-expanding test runner for the WiredTest harness.

use std::process;

fn main() {
    process::exit(wiredtest_runner::run());
}
