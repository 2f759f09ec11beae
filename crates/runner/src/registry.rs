//! Test discovery
//!
//! The builtin suite registers its [`TestDef`]s in a global table built
//! once. Selection takes the command line's positional arguments: an
//! exact name, a `name*` glob, or a numeric range `a-b` matching the
//! digits a test name ends with. A selector matching nothing is an
//! invocation error, not an empty run.

use once_cell::sync::Lazy;

use wiredtest_core::{Error, Result};
use wiredtest_harness::case::TestDef;

use crate::suite;

static TESTS: Lazy<Vec<TestDef>> = Lazy::new(suite::all_tests);

/// Every registered test, in suite order.
pub fn all() -> &'static [TestDef] {
    &TESTS
}

/// The tests the selectors pick, deduplicated, in suite order.
///
/// No selectors means every test.
///
/// # Errors
/// `InvalidArgument` when a selector matches no test.
pub fn select(selectors: &[String]) -> Result<Vec<&'static TestDef>> {
    if selectors.is_empty() {
        return Ok(all().iter().collect());
    }
    let mut picked: Vec<&'static TestDef> = Vec::new();
    for selector in selectors {
        let matched: Vec<&'static TestDef> = all()
            .iter()
            .filter(|def| matches_selector(def.name, selector))
            .collect();
        if matched.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "no tests match selector {:?}",
                selector
            )));
        }
        for def in matched {
            if !picked.iter().any(|p| std::ptr::eq(*p, def)) {
                picked.push(def);
            }
        }
    }
    picked.sort_by_key(|def| {
        all()
            .iter()
            .position(|d| std::ptr::eq(d, *def))
            .unwrap_or(usize::MAX)
    });
    Ok(picked)
}

fn matches_selector(name: &str, selector: &str) -> bool {
    if let Some(prefix) = selector.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    if let Some((lo, hi)) = parse_range(selector) {
        return numeric_suffix(name).is_some_and(|n| lo <= n && n <= hi);
    }
    name == selector
}

/// Parse `a-b` where both sides are plain decimal numbers.
fn parse_range(selector: &str) -> Option<(u32, u32)> {
    let (a, b) = selector.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

/// The decimal number a test name ends with, if any.
fn numeric_suffix(name: &str) -> Option<u32> {
    let digits = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| &name[i..])?;
    digits.parse().ok()
}
