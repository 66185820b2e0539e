// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// Top-level project file as read from YAML.
///
/// ```yaml
/// containers:
///   db:
///     image: postgres:13
///     health_check:
///       command: pg_isready -U postgres
///       interval: 1s
///       retries: 5
///
///   app:
///     build:
///       context: .
///     dependencies: [db]
///
/// tasks:
///   test:
///     run:
///       container: app
///       command: ./gradlew test
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectFile {
    /// All containers from `containers.<name>`. Keys are the container names.
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerConfig>,

    /// All tasks from `tasks.<name>`. Keys are the task names.
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
}

/// `containers.<name>` section.
///
/// Exactly one of `image` and `build` must be set; `validate` enforces this.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    /// Image reference to pull (e.g. `postgres:13`).
    #[serde(default)]
    pub image: Option<String>,

    /// Build an image from a local context instead of pulling one.
    #[serde(default)]
    pub build: Option<BuildSection>,

    /// Default command for the container, in shell form.
    #[serde(default)]
    pub command: Option<String>,

    /// Environment variables declared for this container.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Working directory inside the container.
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Volume mounts in `host:container[:options]` form.
    #[serde(default)]
    pub volumes: Vec<String>,

    /// TCP port mappings in `host:container` form.
    #[serde(default)]
    pub ports: Vec<String>,

    /// Health-check overrides applied on top of whatever the image defines.
    #[serde(default)]
    pub health_check: HealthCheckSection,

    /// User and group to run the container as.
    #[serde(default)]
    pub run_as: Option<RunAsSection>,

    /// Containers that must be started and healthy before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// `build:` subsection of a container.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSection {
    /// Build context directory, relative to the project file.
    pub context: String,

    /// Dockerfile path relative to the context. Defaults to `Dockerfile`.
    #[serde(default)]
    pub dockerfile: Option<String>,

    /// Build arguments passed to the Docker build.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

/// `health_check:` subsection of a container.
///
/// Durations are strings like `"500ms"`, `"1s"`, `"2m"`. Unset fields fall
/// back to whatever the image declares (zero on the wire).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthCheckSection {
    /// Health-check command; when unset the image's own check is used.
    #[serde(default)]
    pub command: Option<String>,

    /// Time between health checks.
    #[serde(default)]
    pub interval: Option<String>,

    /// Number of failed checks before the container is unhealthy.
    #[serde(default)]
    pub retries: Option<u32>,

    /// Grace period before failed checks start counting.
    #[serde(default)]
    pub start_period: Option<String>,
}

/// `run_as:` subsection of a container.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RunAsSection {
    pub uid: u32,
    pub gid: u32,
}

/// `tasks.<name>` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// What to run and where.
    pub run: TaskRunSection,

    /// Human-readable description shown by `--list-tasks`.
    #[serde(default)]
    pub description: Option<String>,
}

/// `run:` subsection of a task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRunSection {
    /// The main container the task command runs in.
    pub container: String,

    /// Command override for the main container.
    #[serde(default)]
    pub command: Option<String>,

    /// Extra environment applied on top of the container's declared one.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Parse a duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
