// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::model::ProjectFile;
use crate::config::validate::validate_project;

/// Load a project file from a given path and return the raw `ProjectFile`.
///
/// This only performs YAML deserialization; it does **not** perform semantic
/// validation (dependency-graph correctness, etc.). Use [`load_and_validate`]
/// for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ProjectFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading project file at {:?}", path))?;

    let project: ProjectFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing YAML project file from {:?}", path))?;

    Ok(project)
}

/// Load a project file from path and run basic validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads YAML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - containers with neither or both of `image` / `build`,
///   - unknown dependency references,
///   - dependency cycles,
///   - tasks referring to unknown containers.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ProjectFile> {
    let project = load_from_path(&path)?;
    validate_project(&project)?;
    Ok(project)
}
