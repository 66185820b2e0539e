// src/errors.rs

//! Crate-wide error aliases.
//!
//! Application-level plumbing uses `anyhow`; subsystems whose callers match
//! on failure kinds (the Docker client, command-line splitting, the event
//! store) define their own `thiserror` enums next to their code.

pub use anyhow::{Error, Result};
