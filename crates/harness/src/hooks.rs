//! Runtime behavior hooks
//!
//! A hook is a named bundle of skip predicates and operation interceptors,
//! installed once at runner startup and active for the whole run. Tests
//! opt out of incompatible hooks by naming them in their definition; hooks
//! themselves may veto tests by tag. Cursor interceptors compose in
//! installation order, the innermost wrapper being the first hook
//! installed.

use std::sync::Arc;

use wiredtest_core::{Error, Result, TimestampClock};
use wiredtest_engine::{Cursor, Session};

use crate::txn::TimestampedCursor;

/// A named runtime override active for an entire run
pub trait Hook: Send + Sync {
    /// The name tests and `--hook` refer to.
    fn name(&self) -> &str;

    /// A reason to skip a test carrying `tags`, if this hook cannot run it.
    fn skip_reason(&self, tags: &[&str]) -> Option<String> {
        let _ = tags;
        None
    }

    /// Intercept a cursor opened through the test context.
    fn wrap_cursor<'a>(
        &self,
        session: &'a Session,
        clock: &'a TimestampClock,
        cursor: Box<dyn Cursor + 'a>,
    ) -> Box<dyn Cursor + 'a> {
        let _ = (session, clock);
        cursor
    }
}

/// The hooks installed for one run, in installation order
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    /// An empty registry.
    pub fn new() -> HookRegistry {
        HookRegistry::default()
    }

    /// Install a hook. Installation order is composition order.
    pub fn install(&mut self, hook: Arc<dyn Hook>) {
        tracing::info!(hook = hook.name(), "hook installed");
        self.hooks.push(hook);
    }

    /// Whether a hook with this name is installed.
    pub fn is_active(&self, name: &str) -> bool {
        self.hooks.iter().any(|h| h.name() == name)
    }

    /// Installed hook names, in installation order.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Decide whether a test must be skipped under the installed hooks.
    ///
    /// `skip_for_hooks` is the test's own (hook name, reason) list; hook
    /// tag predicates are consulted afterwards. The first match wins.
    pub fn skip_reason(
        &self,
        skip_for_hooks: &[(&str, &str)],
        tags: &[&str],
    ) -> Option<String> {
        for (name, reason) in skip_for_hooks {
            if self.is_active(name) {
                return Some(format!("hook {}: {}", name, reason));
            }
        }
        for hook in &self.hooks {
            if let Some(reason) = hook.skip_reason(tags) {
                return Some(format!("hook {}: {}", hook.name(), reason));
            }
        }
        None
    }

    /// Apply every hook's cursor interceptor, installation order inward-out.
    pub fn wrap_cursor<'a>(
        &self,
        session: &'a Session,
        clock: &'a TimestampClock,
        mut cursor: Box<dyn Cursor + 'a>,
    ) -> Box<dyn Cursor + 'a> {
        for hook in &self.hooks {
            cursor = hook.wrap_cursor(session, clock, cursor);
        }
        cursor
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.names())
            .finish()
    }
}

/// Forces a commit timestamp onto every bare table mutation
///
/// Table cursors opened through the test context come back wrapped in a
/// [`TimestampedCursor`], so untimestamped tests run under timestamp
/// discipline without modification. Tests tagged `prepare` are skipped;
/// restamping a transaction that manages its own prepare and commit
/// timestamps would fight the test.
#[derive(Debug, Default)]
pub struct TimestampHook;

impl Hook for TimestampHook {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn skip_reason(&self, tags: &[&str]) -> Option<String> {
        if tags.contains(&"prepare") {
            Some("test manages its own prepare timestamps".to_string())
        } else {
            None
        }
    }

    fn wrap_cursor<'a>(
        &self,
        session: &'a Session,
        clock: &'a TimestampClock,
        cursor: Box<dyn Cursor + 'a>,
    ) -> Box<dyn Cursor + 'a> {
        if cursor.uri().starts_with("table:") {
            Box::new(TimestampedCursor::new(cursor, session, clock))
        } else {
            cursor
        }
    }
}

/// Parse a `--hook` argument of the form `name` or `name=arg`.
///
/// # Errors
/// `InvalidArgument` for unknown hook names.
pub fn parse_hook(spec: &str) -> Result<Arc<dyn Hook>> {
    let (name, _arg) = match spec.split_once('=') {
        Some((name, arg)) => (name, Some(arg)),
        None => (spec, None),
    };
    match name {
        "timestamp" => Ok(Arc::new(TimestampHook)),
        other => Err(Error::InvalidArgument(format!(
            "unknown hook: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiredtest_core::{Key, Value};
    use wiredtest_engine::Connection;

    #[test]
    fn test_registry_activation_and_skip() {
        let mut registry = HookRegistry::new();
        assert!(!registry.is_active("timestamp"));
        registry.install(parse_hook("timestamp").unwrap());
        assert!(registry.is_active("timestamp"));

        // Test-declared skips beat hook tag predicates.
        let reason = registry
            .skip_reason(&[("timestamp", "incompatible workload")], &[])
            .unwrap();
        assert!(reason.contains("incompatible workload"));

        let reason = registry.skip_reason(&[], &["prepare"]).unwrap();
        assert!(reason.contains("prepare"));

        assert!(registry.skip_reason(&[], &["checkpoint"]).is_none());
    }

    #[test]
    fn test_unknown_hook_rejected() {
        assert!(parse_hook("banana").is_err());
    }

    #[test]
    fn test_timestamp_hook_stamps_mutations() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create").unwrap();
        let session = conn.open_session().unwrap();
        session
            .create("table:main", "key_format=S,value_format=S")
            .unwrap();
        let clock = TimestampClock::new();

        let mut registry = HookRegistry::new();
        registry.install(parse_hook("timestamp").unwrap());

        let raw = session.open_cursor("table:main", "").unwrap();
        let mut cursor = registry.wrap_cursor(&session, &clock, raw);
        cursor.set_key(Key::Str("a".to_string()));
        cursor.set_value(Value::Str("1".to_string()));
        cursor.insert().unwrap();
        drop(cursor);

        // The bare insert committed at a hook-assigned timestamp.
        assert_eq!(conn.query_timestamp("get=all_durable").unwrap(), "1");
        drop(session);
        conn.close().unwrap();
    }

    #[test]
    fn test_non_table_cursors_pass_through() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path(), "create").unwrap();
        let session = conn.open_session().unwrap();
        session
            .create("table:main", "key_format=S,value_format=S")
            .unwrap();
        let clock = TimestampClock::new();

        let mut registry = HookRegistry::new();
        registry.install(parse_hook("timestamp").unwrap());
        let raw = session.open_cursor("metadata:", "").unwrap();
        let mut cursor = registry.wrap_cursor(&session, &clock, raw);
        assert!(cursor.next().unwrap());
        drop(cursor);
        drop(session);
        conn.close().unwrap();
    }
}
