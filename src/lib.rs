//! WiredTest - test-harness core for a timestamped storage engine
//!
//! WiredTest packages a scenario-expanding test harness together with the
//! in-process reference engine it exercises: tables behind an engine
//! facade, snapshot transactions with commit and prepare timestamps,
//! logging and recovery, full and incremental backup, and a runner that
//! expands parameterized tests across a worker pool.
//!
//! # Quick Start
//!
//! ```ignore
//! use wiredtest::engine::Connection;
//! use wiredtest::{Key, Value};
//!
//! let conn = Connection::open("DBHOME", "create")?;
//! let session = conn.open_session()?;
//! session.create("table:hello", "key_format=S,value_format=S")?;
//!
//! let mut cursor = session.open_cursor("table:hello", "")?;
//! cursor.set_key(Key::Str("greeting".into()));
//! cursor.set_value(Value::Str("hello".into()));
//! cursor.insert()?;
//! ```
//!
//! # Architecture
//!
//! The workspace layers its crates the way the harness consumes them:
//! `wiredtest-core` holds the shared types, errors, timestamps, and the
//! configuration grammar; `wiredtest-engine` implements the engine facade
//! and the reference engine behind it; `wiredtest-harness` builds
//! scenarios, test lifecycle, datasets, backup and crash tooling on top;
//! `wiredtest-runner` drives it all from the `wtrun` binary.

pub use wiredtest_core::*;

/// The engine facade: connections, sessions, cursors, backup.
pub mod engine {
    pub use wiredtest_engine::*;
}

/// The test harness: scenarios, lifecycle, datasets, hooks.
pub mod harness {
    pub use wiredtest_harness::*;
}

/// The runner: discovery, worker pool, reporting.
pub mod runner {
    pub use wiredtest_runner::*;
}
