//! Command-line surface of `wtrun`
//!
//! Builder-style clap tree plus the parsed [`Options`] the rest of the
//! runner consumes. Invocation errors exit with code 2, distinct from the
//! code 1 a failing test produces.

use clap::{Arg, ArgAction, ArgMatches, Command};

/// Parsed command-line options
#[derive(Debug, Clone)]
pub struct Options {
    /// Run single-threaded with per-test start logging, for debuggers.
    pub debug: bool,
    /// Stop dispatching new tests after the first failure.
    pub stop_on_first: bool,
    /// Keep working directories of passing tests.
    pub preserve: bool,
    /// Use a timestamped parent directory instead of reusing `WT_TEST`.
    pub timestamp_dir: bool,
    /// Verbosity, 0 through 3.
    pub verbose: u8,
    /// Worker count.
    pub jobs: usize,
    /// List expanded scenario instances without running anything.
    pub dry_run: bool,
    /// `--hook` specifications in installation order.
    pub hooks: Vec<String>,
    /// Per-test wall clock limit in seconds.
    pub timeout: Option<u64>,
    /// Positional test selectors.
    pub selectors: Vec<String>,
}

/// Build the complete `wtrun` command tree.
pub fn build_cli() -> Command {
    Command::new("wtrun")
        .about("Scenario-expanding test runner for the WiredTest harness")
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Run tests one at a time and log each start, for debugger attachment")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stop")
                .short('g')
                .long("stop")
                .help("Stop the run at the first failing test")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("preserve")
                .short('p')
                .long("preserve")
                .help("Keep the working directories of passing tests")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timestamp")
                .short('t')
                .long("timestamp")
                .help("Run under WT_TEST.YYYYMMDD-HHMMSS instead of replacing WT_TEST")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Verbosity level, 0 to 3")
                .value_parser(clap::value_parser!(u8))
                .default_value("0"),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .help("Number of parallel workers")
                .value_parser(clap::value_parser!(usize))
                .default_value("1"),
        )
        .arg(
            Arg::new("dry-run")
                .short('D')
                .long("dry-run")
                .help("List the expanded scenario instances without running them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("hook")
                .long("hook")
                .help("Install a runtime hook, name or name=arg; repeatable")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Per-test wall clock limit in seconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("selector")
                .help("Test name, name* glob, or numeric range a-b")
                .action(ArgAction::Append),
        )
}

/// Extract [`Options`] from parsed matches.
pub fn parse_options(matches: &ArgMatches) -> Options {
    Options {
        debug: matches.get_flag("debug"),
        stop_on_first: matches.get_flag("stop"),
        preserve: matches.get_flag("preserve"),
        timestamp_dir: matches.get_flag("timestamp"),
        verbose: matches.get_one::<u8>("verbose").copied().unwrap_or(0),
        jobs: matches.get_one::<usize>("jobs").copied().unwrap_or(1).max(1),
        dry_run: matches.get_flag("dry-run"),
        hooks: matches
            .get_many::<String>("hook")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        timeout: matches.get_one::<u64>("timeout").copied(),
        selectors: matches
            .get_many::<String>("selector")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        let matches = build_cli().try_get_matches_from(args).unwrap();
        parse_options(&matches)
    }

    #[test]
    fn test_defaults() {
        let opts = parse(&["wtrun"]);
        assert!(!opts.preserve);
        assert!(!opts.stop_on_first);
        assert_eq!(opts.verbose, 0);
        assert_eq!(opts.jobs, 1);
        assert!(opts.hooks.is_empty());
        assert!(opts.timeout.is_none());
        assert!(opts.selectors.is_empty());
    }

    #[test]
    fn test_full_invocation() {
        let opts = parse(&[
            "wtrun", "-p", "-g", "-t", "-v", "2", "-j", "4", "--hook", "timestamp", "--timeout",
            "120", "base01", "txn*",
        ]);
        assert!(opts.preserve && opts.stop_on_first && opts.timestamp_dir);
        assert_eq!(opts.verbose, 2);
        assert_eq!(opts.jobs, 4);
        assert_eq!(opts.hooks, vec!["timestamp".to_string()]);
        assert_eq!(opts.timeout, Some(120));
        assert_eq!(opts.selectors, vec!["base01".to_string(), "txn*".to_string()]);
    }

    #[test]
    fn test_zero_jobs_clamps_to_one() {
        assert_eq!(parse(&["wtrun", "-j", "0"]).jobs, 1);
    }

    #[test]
    fn test_bad_flag_is_an_error() {
        assert!(build_cli().try_get_matches_from(["wtrun", "--banana"]).is_err());
    }
}
