//! Core types for the WiredTest harness
//!
//! This crate defines the foundational types shared by the engine façade,
//! the harness, and the runner:
//! - Error: tagged error kinds surfaced by the engine boundary
//! - Timestamp: 64-bit logical timestamps with the canonical hex rendering
//! - TimestampClock: strictly monotonic timestamp generator for tests
//! - Config: the `key=value` configuration grammar and the typed builder
//! - Format: key/value format codes (`r`, `i`, `S`, `s`, `u`, `8t`, ...)
//! - Key / Value: canonical key and value representations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod format;
pub mod timestamp;

pub use config::{parse_config, ConfigBuilder, ConfigError, ConfigItem, ConfigMap};
pub use error::{Error, Result};
pub use format::{FormatError, FormatType, Key, Value};
pub use timestamp::{timestamp_str, Timestamp, TimestampClock};
