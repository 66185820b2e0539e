// src/config/validate.rs

use anyhow::{anyhow, Context, Result};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{parse_duration, ProjectFile};

/// Run basic semantic validation against a loaded project file.
///
/// This checks:
/// - there is at least one task
/// - every container has exactly one of `image` / `build`
/// - all `dependencies` refer to existing containers
/// - the container graph has no cycles
/// - every task's main container exists
/// - health-check duration strings parse
pub fn validate_project(project: &ProjectFile) -> Result<()> {
    ensure_has_tasks(project)?;
    validate_image_sources(project)?;
    validate_container_dependencies(project)?;
    validate_dependency_graph(project)?;
    validate_tasks(project)?;
    validate_health_checks(project)?;
    Ok(())
}

fn ensure_has_tasks(project: &ProjectFile) -> Result<()> {
    if project.tasks.is_empty() {
        return Err(anyhow!(
            "project must contain at least one tasks.<name> entry"
        ));
    }
    Ok(())
}

fn validate_image_sources(project: &ProjectFile) -> Result<()> {
    for (name, container) in project.containers.iter() {
        match (&container.image, &container.build) {
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "container '{}' has both `image` and `build`; use exactly one",
                    name
                ));
            }
            (None, None) => {
                return Err(anyhow!(
                    "container '{}' has neither `image` nor `build`; use exactly one",
                    name
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_container_dependencies(project: &ProjectFile) -> Result<()> {
    for (name, container) in project.containers.iter() {
        for dep in container.dependencies.iter() {
            if !project.containers.contains_key(dep) {
                return Err(anyhow!(
                    "container '{}' has unknown dependency '{}'",
                    name,
                    dep
                ));
            }
            if dep == name {
                return Err(anyhow!("container '{}' cannot depend on itself", name));
            }
        }
    }
    Ok(())
}

fn validate_dependency_graph(project: &ProjectFile) -> Result<()> {
    // Edge direction: dep -> container. For:
    //   app:
    //     dependencies: [db]
    // we add edge db -> app.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in project.containers.keys() {
        graph.add_node(name.as_str());
    }

    for (name, container) in project.containers.iter() {
        for dep in container.dependencies.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(anyhow!(
                "cycle detected in container dependencies involving '{}'",
                node
            ))
        }
    }
}

fn validate_tasks(project: &ProjectFile) -> Result<()> {
    for (name, task) in project.tasks.iter() {
        if !project.containers.contains_key(&task.run.container) {
            return Err(anyhow!(
                "task '{}' runs in unknown container '{}'",
                name,
                task.run.container
            ));
        }
    }
    Ok(())
}

fn validate_health_checks(project: &ProjectFile) -> Result<()> {
    for (name, container) in project.containers.iter() {
        for field in [
            &container.health_check.interval,
            &container.health_check.start_period,
        ] {
            if let Some(s) = field {
                parse_duration(s)
                    .map_err(|e| anyhow!(e))
                    .with_context(|| format!("invalid duration in health_check of '{}'", name))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(yaml: &str) -> ProjectFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn rejects_dependency_cycle() {
        let p = project(
            r#"
containers:
  a:
    image: x
    dependencies: [b]
  b:
    image: y
    dependencies: [a]
tasks:
  t:
    run:
      container: a
"#,
        );
        let err = validate_project(&p).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let p = project(
            r#"
containers:
  a:
    image: x
    dependencies: [nope]
tasks:
  t:
    run:
      container: a
"#,
        );
        let err = validate_project(&p).unwrap_err();
        assert!(err.to_string().contains("unknown dependency"));
    }

    #[test]
    fn rejects_container_with_image_and_build() {
        let p = project(
            r#"
containers:
  a:
    image: x
    build:
      context: .
tasks:
  t:
    run:
      container: a
"#,
        );
        assert!(validate_project(&p).is_err());
    }

    #[test]
    fn rejects_task_with_unknown_container() {
        let p = project(
            r#"
containers:
  a:
    image: x
tasks:
  t:
    run:
      container: missing
"#,
        );
        let err = validate_project(&p).unwrap_err();
        assert!(err.to_string().contains("unknown container"));
    }

    #[test]
    fn accepts_valid_project() {
        let p = project(
            r#"
containers:
  db:
    image: postgres:13
  app:
    build:
      context: .
    dependencies: [db]
tasks:
  test:
    run:
      container: app
      command: ./test.sh
"#,
        );
        assert!(validate_project(&p).is_ok());
    }
}
