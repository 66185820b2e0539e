// src/engine/reactor.rs

//! Scheduling rules: which steps follow from an event.
//!
//! Both entry points are pure functions over the event and the context's
//! current event log; they never enqueue anything themselves. Re-running
//! them over the same log yields the same steps, and the queue's structural
//! dedup makes that safe.

use crate::plan::ImageSource;

use super::context::TaskContext;
use super::event::TaskEvent;
use super::step::TaskStep;

/// Steps that start a run: the task network, plus an image build or pull for
/// every container in the dependency closure.
pub fn seed(ctx: &TaskContext) -> Vec<TaskStep> {
    let mut steps = vec![TaskStep::CreateTaskNetwork];

    for (name, container) in ctx.plan.containers.iter() {
        steps.push(match container.image {
            ImageSource::Pull { .. } => TaskStep::PullImage {
                container: name.clone(),
            },
            ImageSource::Build { .. } => TaskStep::BuildImage {
                container: name.clone(),
            },
        });
    }

    steps
}

/// Follow-up steps for a freshly appended event.
///
/// Forward progress stops entirely once the run is aborting; teardown is the
/// cleanup planner's job, not this one's.
pub fn react(event: &TaskEvent, ctx: &TaskContext) -> Vec<TaskStep> {
    if ctx.is_aborting() {
        return Vec::new();
    }

    match event {
        TaskEvent::ImageBuilt { container, .. } | TaskEvent::ImagePulled { container, .. } => {
            if ctx.network_id().is_some() {
                vec![TaskStep::CreateContainer {
                    container: container.clone(),
                }]
            } else {
                Vec::new()
            }
        }

        TaskEvent::TaskNetworkCreated { .. } => ctx
            .plan
            .containers
            .keys()
            .filter(|name| ctx.image_ready(name))
            .map(|name| TaskStep::CreateContainer {
                container: name.clone(),
            })
            .collect(),

        TaskEvent::ContainerCreated { container, .. } => {
            if ctx.dependencies_healthy(container) {
                vec![TaskStep::StartContainer {
                    container: container.clone(),
                }]
            } else {
                Vec::new()
            }
        }

        TaskEvent::ContainerStarted { container } => {
            vec![TaskStep::WaitForContainerToBecomeHealthy {
                container: container.clone(),
            }]
        }

        TaskEvent::ContainerBecameHealthy { container } => {
            // Any container that was created while this one was still
            // starting may now be unblocked.
            let mut steps: Vec<TaskStep> = ctx
                .plan
                .containers
                .keys()
                .filter(|name| {
                    ctx.container_created(name)
                        && !ctx.container_started(name)
                        && ctx.dependencies_healthy(name)
                })
                .map(|name| TaskStep::StartContainer {
                    container: name.clone(),
                })
                .collect();

            if ctx.plan.is_main(container) {
                steps.push(TaskStep::RunContainer {
                    container: container.clone(),
                });
            }

            steps
        }

        // Exits, teardown progress and failures schedule nothing here; the
        // run loop hands those to the cleanup planner.
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::TaskPlan;
    use std::path::Path;

    fn two_container_context() -> TaskContext {
        let project = serde_yaml::from_str(
            r#"
containers:
  db:
    image: postgres:13
  app:
    image: app:dev
    dependencies: [db]
tasks:
  test:
    run:
      container: app
"#,
        )
        .unwrap();
        let plan = TaskPlan::resolve(&project, "test", vec![], Path::new(".")).unwrap();
        TaskContext::new(plan)
    }

    fn pulled(container: &str) -> TaskEvent {
        TaskEvent::ImagePulled {
            container: container.into(),
            image: "img".into(),
        }
    }

    #[test]
    fn seeds_network_and_one_image_step_per_container() {
        let ctx = two_container_context();
        let steps = seed(&ctx);
        assert_eq!(
            steps,
            vec![
                TaskStep::CreateTaskNetwork,
                TaskStep::PullImage {
                    container: "app".into()
                },
                TaskStep::PullImage {
                    container: "db".into()
                },
            ]
        );
    }

    #[test]
    fn container_is_created_only_once_network_and_image_are_ready() {
        let ctx = two_container_context();

        ctx.events.append(pulled("db"), None);
        assert!(react(&pulled("db"), &ctx).is_empty());

        let network = TaskEvent::TaskNetworkCreated {
            network: "net-1".into(),
        };
        ctx.events.append(network.clone(), None);
        assert_eq!(
            react(&network, &ctx),
            vec![TaskStep::CreateContainer {
                container: "db".into()
            }]
        );
    }

    #[test]
    fn dependent_waits_for_dependency_health() {
        let ctx = two_container_context();
        ctx.events.append(
            TaskEvent::TaskNetworkCreated {
                network: "net-1".into(),
            },
            None,
        );
        ctx.events.append(pulled("app"), None);
        ctx.events.append(pulled("db"), None);

        let app_created = TaskEvent::ContainerCreated {
            container: "app".into(),
            docker_id: "a1".into(),
        };
        ctx.events.append(app_created.clone(), None);
        // db is not healthy yet, so app must not start.
        assert!(react(&app_created, &ctx).is_empty());

        ctx.events.append(
            TaskEvent::ContainerCreated {
                container: "db".into(),
                docker_id: "d1".into(),
            },
            None,
        );
        ctx.events.append(
            TaskEvent::ContainerStarted {
                container: "db".into(),
            },
            None,
        );
        let db_healthy = TaskEvent::ContainerBecameHealthy {
            container: "db".into(),
        };
        ctx.events.append(db_healthy.clone(), None);

        assert_eq!(
            react(&db_healthy, &ctx),
            vec![TaskStep::StartContainer {
                container: "app".into()
            }]
        );
    }

    #[test]
    fn main_container_health_schedules_the_run() {
        let ctx = two_container_context();
        let healthy = TaskEvent::ContainerBecameHealthy {
            container: "app".into(),
        };
        ctx.events.append(healthy.clone(), None);
        assert_eq!(
            react(&healthy, &ctx),
            vec![TaskStep::RunContainer {
                container: "app".into()
            }]
        );
    }

    #[test]
    fn aborting_suppresses_forward_progress() {
        let ctx = two_container_context();
        ctx.events.append(
            TaskEvent::TaskNetworkCreated {
                network: "net-1".into(),
            },
            None,
        );
        ctx.begin_aborting();

        let event = pulled("db");
        ctx.events.append(event.clone(), None);
        assert!(react(&event, &ctx).is_empty());
    }

    #[test]
    fn reacting_twice_enqueues_nothing_new() {
        let ctx = two_container_context();
        ctx.events.append(
            TaskEvent::TaskNetworkCreated {
                network: "net-1".into(),
            },
            None,
        );
        let event = pulled("db");
        ctx.events.append(event.clone(), None);

        let mut accepted = 0;
        for step in react(&event, &ctx) {
            if ctx.queue.enqueue(step) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        for step in react(&event, &ctx) {
            assert!(!ctx.queue.enqueue(step), "second pass must be a no-op");
        }
    }
}
