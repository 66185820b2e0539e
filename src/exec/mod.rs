// src/exec/mod.rs

//! Step execution layer.
//!
//! This module is responsible for actually carrying out the engine's steps
//! against the Docker daemon and reporting back to the run loop via
//! `RuntimeMessage`s.
//!
//! - [`executor`] owns the bounded worker pool that steps are dispatched to.
//! - [`step_runner`] contains one handler per step kind; handlers translate
//!   every outcome, including failures, into events.
//! - [`command_line`] splits user-supplied command strings with POSIX shell
//!   quoting rules.

pub mod command_line;
pub mod executor;
pub mod step_runner;

pub use command_line::{parse_command_line, CommandLineParseError};
pub use executor::{default_worker_count, EventSink, Executor};
