//! Worker pool
//!
//! Scenario instances are dispatched whole to a pool of plain threads
//! pulling from a shared queue; verdicts funnel back over an mpsc
//! channel. Workers never share a working directory: each instance runs
//! under its own `<name>.<index>` subtree of the parent directory.
//!
//! With a timeout configured each instance runs on its own thread; on
//! expiry the instance is reported failed with its directory preserved
//! and the runaway thread is left detached. A panicking worker loses at
//! most the instance it was running; `run_test` already converts body
//! panics into failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use wiredtest_harness::case::{
    instance_name, run_test, RunContext, TestDef, TestOutcome, Verdict,
};
use wiredtest_harness::scenario::Scenario;

/// One scenario instance awaiting execution
pub struct Job {
    /// The test definition.
    pub def: &'static TestDef,
    /// The scenario this instance runs under.
    pub scenario: Scenario,
    /// Instance number within the test, names the working directory.
    pub index: usize,
}

/// Expand every selected test into its scenario instances.
pub fn expand_jobs(tests: &[&'static TestDef]) -> Vec<Job> {
    let mut jobs = Vec::new();
    for def in tests {
        for (index, scenario) in def.expand_scenarios().into_iter().enumerate() {
            jobs.push(Job {
                def,
                scenario,
                index,
            });
        }
    }
    jobs
}

/// Run `jobs` across `workers` threads and collect every outcome.
///
/// `stop_on_first` drains the queue after a failure; instances already
/// running are allowed to finish and are still reported.
pub fn run_pool(
    jobs: Vec<Job>,
    workers: usize,
    stop_on_first: bool,
    timeout: Option<u64>,
    run: &RunContext,
) -> Vec<TestOutcome> {
    let total = jobs.len();
    let queue = Mutex::new(VecDeque::from(jobs));
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<TestOutcome>();

    let mut outcomes = Vec::with_capacity(total);
    thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            let tx = tx.clone();
            let queue = &queue;
            let stop = &stop;
            scope.spawn(move || loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let Some(job) = queue.lock().pop_front() else {
                    break;
                };
                let outcome = run_job(&job, timeout, run);
                if stop_on_first && outcome.verdict == Verdict::Fail {
                    stop.store(true, Ordering::Relaxed);
                }
                if tx.send(outcome).is_err() {
                    break;
                }
            });
        }
        drop(tx);
        for outcome in rx {
            outcomes.push(outcome);
        }
    });
    outcomes
}

fn run_job(job: &Job, timeout: Option<u64>, run: &RunContext) -> TestOutcome {
    let Some(secs) = timeout else {
        return run_test(job.def, &job.scenario, job.index, run);
    };

    let def = job.def;
    let scenario = job.scenario.clone();
    let index = job.index;
    let run_clone = run.clone();
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("{}.{}", def.name, index))
        .spawn(move || {
            let _ = tx.send(run_test(def, &scenario, index, &run_clone));
        });
    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            return TestOutcome {
                name: instance_name(def, &job.scenario),
                verdict: Verdict::Fail,
                duration: Duration::ZERO,
                message: Some(format!("worker spawn failed: {}", e)),
                preserved_dir: None,
            }
        }
    };

    match rx.recv_timeout(Duration::from_secs(secs)) {
        Ok(outcome) => {
            let _ = handle.join();
            outcome
        }
        Err(_) => {
            // The instance keeps running detached; its directory stays.
            let dir = run.parent_dir.join(format!("{}.{}", def.name, index));
            tracing::warn!(test = %instance_name(def, &job.scenario), secs, "timed out");
            TestOutcome {
                name: instance_name(def, &job.scenario),
                verdict: Verdict::Fail,
                duration: Duration::from_secs(secs),
                message: Some(format!("timed out after {}s", secs)),
                preserved_dir: Some(dir),
            }
        }
    }
}
