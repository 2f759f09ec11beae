//! Builtin test suite
//!
//! The tests `wtrun` discovers, one module per area in the naming
//! convention of the engine's own suites: a short area name plus a
//! two-digit number.

use wiredtest_harness::case::TestDef;
use wiredtest_harness::scenario::{multiply, Scenario};

mod backup01;
mod backup02;
mod base01;
mod crash01;
mod prepare01;
mod timestamp01;
mod txn01;

/// Every builtin test, in suite order.
pub fn all_tests() -> Vec<TestDef> {
    let mut tests = Vec::new();
    tests.extend(base01::tests());
    tests.extend(txn01::tests());
    tests.extend(timestamp01::tests());
    tests.extend(prepare01::tests());
    tests.extend(backup01::tests());
    tests.extend(backup02::tests());
    tests.extend(crash01::tests());
    tests
}

/// Cross product of scenario lists, empty on a bad definition.
///
/// The lists are static, so a failure here is a suite bug; it surfaces
/// as the test running once with an empty scenario and failing on the
/// missing parameters.
pub(crate) fn product(lists: &[&[Scenario]]) -> Vec<Scenario> {
    match multiply(".", lists) {
        Ok(scenarios) => scenarios,
        Err(e) => {
            tracing::error!(error = %e, "scenario expansion failed");
            Vec::new()
        }
    }
}
