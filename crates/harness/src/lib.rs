//! Test harness for the WiredTest storage engine
//!
//! The harness turns a test body into a managed run: scenario expansion
//! and pruning, a private working directory per instance, a connection
//! opened at setup and reclaimed at teardown, output captured and checked
//! against declared patterns, and runtime hooks that rewrite engine
//! behavior underneath unmodified tests.
//!
//! The capability modules carry the storage-test utilities the bodies
//! share: canonical datasets, backup drivers, crash simulation, and
//! timestamped transaction helpers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod case;
pub mod crash;
pub mod dataset;
pub mod hooks;
pub mod scenario;
pub mod txn;

pub use case::{
    default_conn_config, instance_name, no_scenarios, run_test, RunContext, TestContext, TestDef,
    TestOutcome, Verdict,
};
pub use hooks::{parse_hook, Hook, HookRegistry, TimestampHook};
pub use scenario::{multiply, prune, quick, quick_weighted, ParamValue, Scenario};
