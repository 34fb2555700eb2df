//! Tooling around handlegate debug sessions.
//!
//! This crate provides:
//! - Structured JSONL logging with a schema check (`structured_log`)
//! - A capture helper that records invalid-handle reports (`capture`)
//! - JSON scenarios replayed against a `DebugAbi` (`scenario`)

#![forbid(unsafe_code)]

pub mod capture;
pub mod scenario;
pub mod structured_log;

pub use capture::InvalidHandleCapture;
pub use scenario::{Scenario, ScenarioError, ScenarioReport, Step, run_scenario};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
