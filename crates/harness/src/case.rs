//! Test case lifecycle
//!
//! A test is a [`TestDef`]: a name, a scenario generator, and a body that
//! drives a [`TestContext`]. The runner expands the scenarios, gives each
//! one a private working directory under the run's parent directory, and
//! calls [`run_test`]. Setup opens a connection on a fresh home, teardown
//! closes whatever the body left open, verifies captured output against
//! the declared patterns, and removes the directory on success.
//!
//! Failed and preserved tests keep their directory for inspection.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;

use wiredtest_core::{Error, Result, TimestampClock};
use wiredtest_engine::{Connection, Cursor, Session};

use crate::crash;
use crate::hooks::HookRegistry;
use crate::scenario::Scenario;

/// How long the busy-retry helpers keep trying before giving up.
const RETRY_DEADLINE: Duration = Duration::from_secs(30);
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Settings shared by every test of one run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Directory the per-test working directories are created under.
    pub parent_dir: PathBuf,
    /// Keep working directories even when the test passes.
    pub preserve: bool,
    /// Verbosity level; at 1 and above captured output is also logged.
    pub verbose: u8,
    /// Hooks installed for the run.
    pub hooks: Arc<HookRegistry>,
}

impl RunContext {
    /// A context with no hooks, no preservation, and quiet output.
    pub fn new(parent_dir: impl Into<PathBuf>) -> RunContext {
        RunContext {
            parent_dir: parent_dir.into(),
            preserve: false,
            verbose: 0,
            hooks: Arc::new(HookRegistry::new()),
        }
    }
}

/// A runnable test definition
///
/// `scenarios` returning an empty list means the test runs once with an
/// empty scenario. `skip_for_hooks` names hooks the test cannot run
/// under, with the reason reported for the skip.
#[derive(Debug)]
pub struct TestDef {
    /// Name the runner and reports refer to.
    pub name: &'static str,
    /// Connection configuration, chosen per scenario. `create` is implied.
    pub conn_config: fn(&Scenario) -> String,
    /// Scenario expansion for this test.
    pub scenarios: fn() -> Vec<Scenario>,
    /// The test body.
    pub body: fn(&mut TestContext) -> Result<()>,
    /// Tags hooks use to veto the test.
    pub tags: &'static [&'static str],
    /// (hook name, reason) pairs this test refuses to run under.
    pub skip_for_hooks: &'static [(&'static str, &'static str)],
}

impl TestDef {
    /// The scenarios to run, defaulting to one empty scenario.
    pub fn expand_scenarios(&self) -> Vec<Scenario> {
        let list = (self.scenarios)();
        if list.is_empty() {
            vec![Scenario::empty()]
        } else {
            list
        }
    }
}

/// A `scenarios` function for tests without scenarios.
pub fn no_scenarios() -> Vec<Scenario> {
    Vec::new()
}

/// A `conn_config` function for tests content with the default connection.
pub fn default_conn_config(_scenario: &Scenario) -> String {
    String::new()
}

#[derive(Default)]
struct Output {
    lines: Vec<String>,
    expected: Vec<Regex>,
    ignored: Vec<Regex>,
}

/// The state handed to a test body
///
/// Owns the connection and a default session, captures emitted output,
/// and applies the run's hooks to cursors opened through it.
pub struct TestContext {
    name: String,
    home: PathBuf,
    conn_home: PathBuf,
    scenario: Scenario,
    conn_config: String,
    conn: Option<Connection>,
    session: Option<Session>,
    clock: TimestampClock,
    output: Mutex<Output>,
    skip_requested: Mutex<Option<String>>,
    preserve_requested: AtomicBool,
    hooks: Arc<HookRegistry>,
    verbose: u8,
}

impl TestContext {
    fn new(
        name: String,
        home: PathBuf,
        scenario: Scenario,
        conn_config: String,
        run: &RunContext,
    ) -> TestContext {
        TestContext {
            name,
            conn_home: home.clone(),
            home,
            scenario,
            conn_config,
            conn: None,
            session: None,
            clock: TimestampClock::new(),
            output: Mutex::new(Output::default()),
            skip_requested: Mutex::new(None),
            preserve_requested: AtomicBool::new(false),
            hooks: Arc::clone(&run.hooks),
            verbose: run.verbose,
        }
    }

    /// The test's full name, scenario suffix included.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The test's private working directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The directory the current connection is open on.
    ///
    /// Starts equal to [`home`](Self::home) and moves under it after a
    /// [`simulate_crash_restart`](Self::simulate_crash_restart).
    pub fn conn_home(&self) -> &Path {
        &self.conn_home
    }

    /// The scenario this instance runs under.
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// The per-test timestamp clock.
    pub fn clock(&self) -> &TimestampClock {
        &self.clock
    }

    /// The open connection.
    ///
    /// # Errors
    /// `InvalidArgument` when the connection is closed.
    pub fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("no open connection".to_string()))
    }

    /// The default session of the open connection.
    pub fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("no open session".to_string()))
    }

    /// Open the connection and its default session.
    ///
    /// Idempotent; an already open connection is left alone.
    pub fn open_conn(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let config = if self.conn_config.is_empty() {
            "create".to_string()
        } else {
            format!("create,{}", self.conn_config)
        };
        let conn = Connection::open(&self.conn_home, &config)?;
        self.session = Some(conn.open_session()?);
        self.conn = Some(conn);
        Ok(())
    }

    /// Close the default session and the connection.
    pub fn close_conn(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            session.close()?;
        }
        if let Some(conn) = self.conn.take() {
            conn.close()?;
        }
        Ok(())
    }

    /// Close and reopen the connection, running recovery if needed.
    ///
    /// The reopen uses the test's connection configuration without
    /// `create`, so a missing home is an error rather than a fresh
    /// database.
    pub fn reopen_conn(&mut self) -> Result<()> {
        self.close_conn()?;
        let conn = Connection::open(&self.conn_home, &self.conn_config)?;
        self.session = Some(conn.open_session()?);
        self.conn = Some(conn);
        Ok(())
    }

    /// Open a cursor on the default session, wrapped by the run's hooks.
    pub fn open_cursor(&self, uri: &str, cfg: &str) -> Result<Box<dyn Cursor + '_>> {
        let session = self.session()?;
        let cursor = session.open_cursor(uri, cfg)?;
        Ok(self.hooks.wrap_cursor(session, &self.clock, cursor))
    }

    /// Whether a hook with this name is installed for the run.
    pub fn running_hook(&self, name: &str) -> bool {
        self.hooks.is_active(name)
    }

    /// Capture one line of test output for pattern verification.
    pub fn emit(&self, line: impl Into<String>) {
        let line = line.into();
        if self.verbose > 0 {
            tracing::info!(test = %self.name, "{}", line);
        }
        self.output.lock().lines.push(line);
    }

    /// Require at least one captured line to match `pattern` at teardown.
    ///
    /// # Errors
    /// `InvalidArgument` for an invalid regular expression.
    pub fn expect_output(&self, pattern: &str) -> Result<()> {
        let re = compile(pattern)?;
        self.output.lock().expected.push(re);
        Ok(())
    }

    /// Allow captured lines matching `pattern` without an expectation.
    pub fn ignore_output(&self, pattern: &str) -> Result<()> {
        let re = compile(pattern)?;
        self.output.lock().ignored.push(re);
        Ok(())
    }

    /// Mark the test skipped and return from the body.
    ///
    /// The returned error carries the reason; the runner reports the
    /// instance as skipped rather than failed.
    pub fn skip<T>(&self, reason: &str) -> Result<T> {
        *self.skip_requested.lock() = Some(reason.to_string());
        Err(Error::InvalidArgument(format!("skipped: {}", reason)))
    }

    /// Keep the working directory at teardown even on a pass.
    pub fn preserve(&self) {
        self.preserve_requested.store(true, Ordering::Relaxed);
    }

    /// Drop `uri`, retrying while the engine reports it busy.
    ///
    /// Cached cursors and pinned checkpoints release asynchronously; the
    /// retry loop gives up after thirty seconds.
    pub fn drop_until_success(&self, uri: &str) -> Result<()> {
        retry_busy(|| self.session()?.drop(uri, ""))
    }

    /// Verify `uri`, retrying while the engine reports it busy.
    pub fn verify_until_success(&self, uri: &str) -> Result<()> {
        retry_busy(|| self.session()?.verify(uri))
    }

    /// Crash the current connection and restart on a copy under `subdir`.
    ///
    /// The durable files are copied while the connection is live, the
    /// connection is dropped without its shutdown checkpoint, and a new
    /// connection opens on the copy, running recovery. Later
    /// [`conn_home`](Self::conn_home) calls name the copy.
    pub fn simulate_crash_restart(&mut self, subdir: &str) -> Result<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| Error::InvalidArgument("no open connection".to_string()))?;
        self.session = None;
        let dst = self.home.join(subdir);
        let restarted =
            crash::simulate_crash_restart(conn, &self.conn_home, &dst, &self.conn_config)?;
        self.conn_home = dst;
        self.session = Some(restarted.open_session()?);
        self.conn = Some(restarted);
        Ok(())
    }

    fn skip_reason(&self) -> Option<String> {
        self.skip_requested.lock().clone()
    }

    /// Check every captured line and expectation, returning the problems.
    fn verify_output(&self) -> Vec<String> {
        let output = self.output.lock();
        let mut problems = Vec::new();
        for line in &output.lines {
            let allowed = output.expected.iter().any(|re| re.is_match(line))
                || output.ignored.iter().any(|re| re.is_match(line));
            if !allowed {
                problems.push(format!("unexpected output: {:?}", line));
            }
        }
        for re in &output.expected {
            if !output.lines.iter().any(|line| re.is_match(line)) {
                problems.push(format!("expected output not seen: {:?}", re.as_str()));
            }
        }
        problems
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::InvalidArgument(format!("bad output pattern {:?}: {}", pattern, e)))
}

fn retry_busy(mut op: impl FnMut() -> Result<()>) -> Result<()> {
    let deadline = Instant::now() + RETRY_DEADLINE;
    loop {
        match op() {
            Err(e) if e.is_busy() && Instant::now() < deadline => {
                std::thread::sleep(RETRY_INTERVAL);
            }
            other => return other,
        }
    }
}

/// How one test instance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Body returned Ok and the output checks passed.
    Pass,
    /// Body failed, panicked, or the output checks failed.
    Fail,
    /// Skipped by a hook or by the body itself.
    Skip,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Skip => "SKIP",
        })
    }
}

/// The result of one test instance
#[derive(Debug)]
pub struct TestOutcome {
    /// Instance name, scenario suffix included.
    pub name: String,
    /// How it ended.
    pub verdict: Verdict,
    /// Wall clock spent in setup, body, and teardown.
    pub duration: Duration,
    /// Failure or skip detail, if any.
    pub message: Option<String>,
    /// Working directory kept for inspection, if any.
    pub preserved_dir: Option<PathBuf>,
}

/// Instance name for `def` under `scenario`.
pub fn instance_name(def: &TestDef, scenario: &Scenario) -> String {
    if scenario.id().is_empty() {
        def.name.to_string()
    } else {
        format!("{}.{}", def.name, scenario.id())
    }
}

/// Run one scenario instance of `def` to completion.
///
/// `index` distinguishes the working directories of a test's scenario
/// instances. Panics in the body are caught and reported as failures;
/// teardown always runs.
pub fn run_test(def: &TestDef, scenario: &Scenario, index: usize, run: &RunContext) -> TestOutcome {
    let name = instance_name(def, scenario);
    let started = Instant::now();

    if let Some(reason) = run
        .hooks
        .skip_reason(def.skip_for_hooks, def.tags)
    {
        tracing::info!(test = %name, %reason, "skipped");
        return TestOutcome {
            name,
            verdict: Verdict::Skip,
            duration: started.elapsed(),
            message: Some(reason),
            preserved_dir: None,
        };
    }

    let home = run.parent_dir.join(format!("{}.{}", def.name, index));
    if let Err(e) = setup_home(&home) {
        return TestOutcome {
            name,
            verdict: Verdict::Fail,
            duration: started.elapsed(),
            message: Some(format!("setup: {}", e)),
            preserved_dir: None,
        };
    }

    let conn_config = (def.conn_config)(scenario);
    let mut ctx = TestContext::new(name.clone(), home.clone(), scenario.clone(), conn_config, run);

    tracing::debug!(test = %name, home = %home.display(), "running");
    let body_result = match ctx.open_conn() {
        Ok(()) => match panic::catch_unwind(AssertUnwindSafe(|| (def.body)(&mut ctx))) {
            Ok(result) => result,
            Err(payload) => Err(Error::Panic(panic_message(payload))),
        },
        Err(e) => Err(e),
    };

    // Teardown runs whatever the body did.
    let close_result = ctx.close_conn();

    let (verdict, message) = if let Some(reason) = ctx.skip_reason() {
        (Verdict::Skip, Some(reason))
    } else {
        match (&body_result, &close_result) {
            (Err(e), _) => (Verdict::Fail, Some(e.to_string())),
            (Ok(()), Err(e)) => (Verdict::Fail, Some(format!("teardown: {}", e))),
            (Ok(()), Ok(())) => {
                let problems = ctx.verify_output();
                if problems.is_empty() {
                    (Verdict::Pass, None)
                } else {
                    (Verdict::Fail, Some(problems.join("; ")))
                }
            }
        }
    };

    let keep = run.preserve
        || ctx.preserve_requested.load(Ordering::Relaxed)
        || verdict == Verdict::Fail;
    let preserved_dir = if keep {
        tracing::info!(test = %name, dir = %home.display(), "working directory preserved");
        Some(home)
    } else {
        let _ = fs::remove_dir_all(&home);
        None
    };

    match verdict {
        Verdict::Pass => tracing::debug!(test = %name, "passed"),
        Verdict::Fail => {
            tracing::warn!(test = %name, message = message.as_deref().unwrap_or(""), "failed")
        }
        Verdict::Skip => {}
    }
    TestOutcome {
        name,
        verdict,
        duration: started.elapsed(),
        message,
        preserved_dir,
    }
}

/// Replace any stale working directory with an empty one.
fn setup_home(home: &Path) -> Result<()> {
    if home.exists() {
        fs::remove_dir_all(home)?;
    }
    fs::create_dir_all(home)?;
    Ok(())
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
