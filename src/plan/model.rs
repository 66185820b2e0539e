// src/plan/model.rs

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::config::model::{parse_duration, ContainerConfig, ProjectFile};

/// Immutable resolved plan for one task invocation: the task, its main
/// container, and the transitive closure of dependency containers.
///
/// The engine never sees the raw project file; everything it needs is
/// resolved here up front.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub task_name: String,
    pub main_container: String,
    /// Command override from the task's `run.command`.
    pub command_override: Option<String>,
    /// Arguments given after `--` on the command line, appended to the main
    /// container's command after shell splitting.
    pub extra_args: Vec<String>,
    /// Extra environment applied on top of the main container's declared one.
    pub extra_env: BTreeMap<String, String>,
    /// Every container this run touches, keyed by name (main included).
    pub containers: BTreeMap<String, Container>,
}

/// A fully resolved container declaration.
#[derive(Debug, Clone)]
pub struct Container {
    pub name: String,
    pub image: ImageSource,
    pub command: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub health_check: HealthCheck,
    pub run_as: Option<UserAndGroup>,
    pub dependencies: Vec<String>,
}

/// Where a container's image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Pull {
        reference: String,
    },
    Build {
        context: PathBuf,
        dockerfile: Option<String>,
        build_args: BTreeMap<String, String>,
    },
}

/// A `host:container[:options]` bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub options: Option<String>,
}

/// A `host:container` TCP port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// Health-check settings overlaid on the image's own check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheck {
    pub command: Option<String>,
    pub interval: Option<Duration>,
    pub retries: Option<u32>,
    pub start_period: Option<Duration>,
}

/// `uid:gid` the container runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAndGroup {
    pub uid: u32,
    pub gid: u32,
}

impl TaskPlan {
    /// Resolve a task from a validated project file.
    ///
    /// `base_dir` is the directory containing the project file; build
    /// contexts are resolved relative to it.
    pub fn resolve(
        project: &ProjectFile,
        task_name: &str,
        extra_args: Vec<String>,
        base_dir: &Path,
    ) -> Result<TaskPlan> {
        let task = project
            .tasks
            .get(task_name)
            .ok_or_else(|| anyhow!("task '{}' is not defined in the project file", task_name))?;

        let main = task.run.container.clone();

        // Breadth-first closure over declared dependencies. The project has
        // already been validated, so unknown names and cycles cannot occur
        // here; missing entries are still reported rather than unwrapped.
        let mut containers = BTreeMap::new();
        let mut pending: VecDeque<String> = VecDeque::new();
        pending.push_back(main.clone());

        while let Some(name) = pending.pop_front() {
            if containers.contains_key(&name) {
                continue;
            }

            let cfg = project
                .containers
                .get(&name)
                .ok_or_else(|| anyhow!("container '{}' is not defined", name))?;

            for dep in cfg.dependencies.iter() {
                pending.push_back(dep.clone());
            }

            let container = resolve_container(&name, cfg, base_dir)
                .with_context(|| format!("resolving container '{}'", name))?;
            containers.insert(name, container);
        }

        Ok(TaskPlan {
            task_name: task_name.to_string(),
            main_container: main,
            command_override: task.run.command.clone(),
            extra_args,
            extra_env: task.run.environment.clone(),
            containers,
        })
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.get(name)
    }

    pub fn is_main(&self, name: &str) -> bool {
        self.main_container == name
    }

    /// The command line the given container should run: the task override
    /// for the main container, else the container's declared command.
    pub fn command_for(&self, name: &str) -> Option<&str> {
        if self.is_main(name) {
            if let Some(cmd) = self.command_override.as_deref() {
                return Some(cmd);
            }
        }
        self.container(name).and_then(|c| c.command.as_deref())
    }
}

fn resolve_container(name: &str, cfg: &ContainerConfig, base_dir: &Path) -> Result<Container> {
    let image = match (&cfg.image, &cfg.build) {
        (Some(reference), None) => ImageSource::Pull {
            reference: reference.clone(),
        },
        (None, Some(build)) => ImageSource::Build {
            context: base_dir.join(&build.context),
            dockerfile: build.dockerfile.clone(),
            build_args: build.args.clone(),
        },
        // Validation guarantees exactly one source.
        _ => return Err(anyhow!("container '{}' has no usable image source", name)),
    };

    let volumes = cfg
        .volumes
        .iter()
        .map(|s| parse_volume(s))
        .collect::<Result<Vec<_>>>()?;

    let ports = cfg
        .ports
        .iter()
        .map(|s| parse_port(s))
        .collect::<Result<Vec<_>>>()?;

    let health_check = HealthCheck {
        command: cfg.health_check.command.clone(),
        interval: parse_optional_duration(&cfg.health_check.interval)?,
        retries: cfg.health_check.retries,
        start_period: parse_optional_duration(&cfg.health_check.start_period)?,
    };

    Ok(Container {
        name: name.to_string(),
        image,
        command: cfg.command.clone(),
        environment: cfg.environment.clone(),
        working_dir: cfg.working_dir.clone(),
        volumes,
        ports,
        health_check,
        run_as: cfg.run_as.map(|r| UserAndGroup {
            uid: r.uid,
            gid: r.gid,
        }),
        dependencies: cfg.dependencies.clone(),
    })
}

fn parse_optional_duration(field: &Option<String>) -> Result<Option<Duration>> {
    match field {
        Some(s) => parse_duration(s).map(Some).map_err(|e| anyhow!(e)),
        None => Ok(None),
    }
}

fn parse_volume(s: &str) -> Result<VolumeMount> {
    let mut parts = s.splitn(3, ':');
    let host = parts.next().filter(|p| !p.is_empty());
    let container = parts.next().filter(|p| !p.is_empty());
    match (host, container) {
        (Some(host), Some(container)) => Ok(VolumeMount {
            host_path: host.to_string(),
            container_path: container.to_string(),
            options: parts.next().map(|o| o.to_string()),
        }),
        _ => Err(anyhow!(
            "invalid volume '{}'; expected host:container[:options]",
            s
        )),
    }
}

fn parse_port(s: &str) -> Result<PortMapping> {
    let mut parts = s.splitn(2, ':');
    let host = parts.next().and_then(|p| p.parse::<u16>().ok());
    let container = parts.next().and_then(|p| p.parse::<u16>().ok());
    match (host, container) {
        (Some(host_port), Some(container_port)) => Ok(PortMapping {
            host_port,
            container_port,
        }),
        _ => Err(anyhow!("invalid port mapping '{}'; expected host:container", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(yaml: &str) -> ProjectFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn resolves_transitive_closure() {
        let p = project(
            r#"
containers:
  cache:
    image: redis:7
  db:
    image: postgres:13
    dependencies: [cache]
  app:
    image: app:dev
    dependencies: [db]
  unrelated:
    image: other
tasks:
  test:
    run:
      container: app
"#,
        );
        let plan = TaskPlan::resolve(&p, "test", vec![], Path::new(".")).unwrap();
        assert_eq!(plan.main_container, "app");
        let names: Vec<_> = plan.containers.keys().cloned().collect();
        assert_eq!(names, vec!["app", "cache", "db"]);
    }

    #[test]
    fn command_override_wins_for_main_only() {
        let p = project(
            r#"
containers:
  db:
    image: postgres:13
    command: postgres
  app:
    image: app:dev
    command: ./serve.sh
    dependencies: [db]
tasks:
  test:
    run:
      container: app
      command: ./test.sh
"#,
        );
        let plan = TaskPlan::resolve(&p, "test", vec![], Path::new(".")).unwrap();
        assert_eq!(plan.command_for("app"), Some("./test.sh"));
        assert_eq!(plan.command_for("db"), Some("postgres"));
    }

    #[test]
    fn parses_volumes_and_ports() {
        let p = project(
            r#"
containers:
  svc:
    image: x
    volumes:
      - ./data:/data:cached
      - ./src:/src
    ports:
      - "8080:80"
tasks:
  t:
    run:
      container: svc
"#,
        );
        let plan = TaskPlan::resolve(&p, "t", vec![], Path::new(".")).unwrap();
        let svc = plan.container("svc").unwrap();
        assert_eq!(
            svc.volumes[0],
            VolumeMount {
                host_path: "./data".into(),
                container_path: "/data".into(),
                options: Some("cached".into()),
            }
        );
        assert_eq!(svc.volumes[1].options, None);
        assert_eq!(
            svc.ports[0],
            PortMapping {
                host_port: 8080,
                container_port: 80
            }
        );
    }

    #[test]
    fn rejects_unknown_task() {
        let p = project(
            r#"
containers:
  svc:
    image: x
tasks:
  t:
    run:
      container: svc
"#,
        );
        assert!(TaskPlan::resolve(&p, "nope", vec![], Path::new(".")).is_err());
    }
}
