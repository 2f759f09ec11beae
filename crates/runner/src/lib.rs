//! The `wtrun` test runner
//!
//! Discovery, scenario expansion, a worker pool, and aggregate
//! reporting over the builtin suite. The binary in `main.rs` is a thin
//! wrapper around [`run`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod pool;
pub mod registry;
pub mod report;
pub mod suite;

use std::path::Path;
use std::sync::Arc;
use std::{env, fs};

use tracing::Level;

use wiredtest_harness::case::{instance_name, RunContext};
use wiredtest_harness::hooks::{parse_hook, HookRegistry};

use cli::Options;

/// Environment variable naming a hook to install by default.
pub const HOOK_ENV: &str = "WT_TEST_HOOK";

/// Parse the process arguments and run. Returns the process exit code:
/// 0 all pass or skip, 1 any failure, 2 invocation error.
pub fn run() -> i32 {
    let matches = match cli::build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 2,
            };
        }
    };
    let opts = cli::parse_options(&matches);
    init_tracing(opts.verbose);
    match run_with_options(&opts, Path::new(".")) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("wtrun: {}", message);
            2
        }
    }
}

/// [`run`] with parsed options and an explicit base directory.
///
/// The parent directory lives under `base`; invocation errors come back
/// as `Err` and map to exit code 2.
pub fn run_with_options(opts: &Options, base: &Path) -> std::result::Result<i32, String> {
    let tests = registry::select(&opts.selectors).map_err(|e| e.to_string())?;
    let hooks = install_hooks(opts)?;
    let jobs = pool::expand_jobs(&tests);

    if opts.dry_run {
        for job in &jobs {
            println!("{}", instance_name(job.def, &job.scenario));
        }
        println!("{} instances from {} tests", jobs.len(), tests.len());
        return Ok(0);
    }

    let parent = report::parent_dir(base, opts.timestamp_dir);
    if !opts.timestamp_dir && parent.exists() {
        fs::remove_dir_all(&parent).map_err(|e| {
            format!("cannot clear parent directory {}: {}", parent.display(), e)
        })?;
    }
    fs::create_dir_all(&parent).map_err(|e| {
        format!("cannot create parent directory {}: {}", parent.display(), e)
    })?;

    let run_ctx = RunContext {
        parent_dir: parent.clone(),
        preserve: opts.preserve,
        verbose: opts.verbose,
        hooks: Arc::new(hooks),
    };
    // Debug mode runs everything on one worker so a debugger can follow.
    let workers = if opts.debug { 1 } else { opts.jobs };
    tracing::info!(
        tests = tests.len(),
        instances = jobs.len(),
        workers,
        parent = %parent.display(),
        "run starting"
    );

    let outcomes = pool::run_pool(jobs, workers, opts.stop_on_first, opts.timeout, &run_ctx);
    for outcome in &outcomes {
        println!("{}", report::format_outcome(outcome));
    }
    let summary = report::summarize(&outcomes);
    println!("{}", report::format_summary(&summary));
    if let Err(e) = report::write_results(&parent, &outcomes) {
        eprintln!("wtrun: cannot write results.txt: {}", e);
    }
    Ok(report::exit_code(&summary))
}

/// Install `--hook` specifications plus the `WT_TEST_HOOK` default.
fn install_hooks(opts: &Options) -> std::result::Result<HookRegistry, String> {
    let mut specs = Vec::new();
    if let Ok(spec) = env::var(HOOK_ENV) {
        if !spec.is_empty() {
            specs.push(spec);
        }
    }
    specs.extend(opts.hooks.iter().cloned());

    let mut hooks = HookRegistry::new();
    for spec in specs {
        let hook = parse_hook(&spec).map_err(|e| e.to_string())?;
        if !hooks.is_active(hook.name()) {
            hooks.install(hook);
        }
    }
    Ok(hooks)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // A second init in the same process (tests) is fine to ignore.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(selectors: &[&str]) -> Options {
        Options {
            debug: false,
            stop_on_first: false,
            preserve: false,
            timestamp_dir: false,
            verbose: 0,
            jobs: 2,
            dry_run: false,
            hooks: Vec::new(),
            timeout: None,
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_unknown_selector_is_invocation_error() {
        let dir = TempDir::new().unwrap();
        assert!(run_with_options(&options(&["banana"]), dir.path()).is_err());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&["base01"]);
        opts.dry_run = true;
        assert_eq!(run_with_options(&opts, dir.path()).unwrap(), 0);
        assert!(!dir.path().join("WT_TEST").exists());
    }

    #[test]
    fn test_base_suite_passes_end_to_end() {
        let dir = TempDir::new().unwrap();
        let code = run_with_options(&options(&["base01"]), dir.path()).unwrap();
        assert_eq!(code, 0);
        let results = dir.path().join("WT_TEST/results.txt");
        let text = std::fs::read_to_string(results).unwrap();
        assert!(text.contains("PASS  base01.row.str"));
        assert!(!text.contains("FAIL"));
    }

    #[test]
    fn test_timestamp_hook_skips_prepare_tests() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&["prepare01"]);
        opts.hooks = vec!["timestamp".to_string()];
        let code = run_with_options(&opts, dir.path()).unwrap();
        assert_eq!(code, 0);
        let text =
            std::fs::read_to_string(dir.path().join("WT_TEST/results.txt")).unwrap();
        assert!(text.contains("SKIP  prepare01"));
    }

    #[test]
    fn test_unknown_hook_is_invocation_error() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&[]);
        opts.hooks = vec!["banana".to_string()];
        assert!(run_with_options(&opts, dir.path()).is_err());
    }
}
