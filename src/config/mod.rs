// src/config/mod.rs

//! Project file loading and validation for taskdock.
//!
//! Responsibilities:
//! - Define the YAML-backed data model (`model.rs`).
//! - Load a project file from disk (`loader.rs`).
//! - Validate basic invariants like dependency-graph correctness
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{BuildSection, ContainerConfig, HealthCheckSection, ProjectFile, TaskConfig};
pub use validate::validate_project;
