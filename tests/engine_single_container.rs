mod support;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use taskdock::config::model::ProjectFile;
use taskdock::docker::DockerApi;
use taskdock::engine::{RecordedEvent, Runtime, TaskContext, TaskEvent};
use taskdock::plan::TaskPlan;

use support::FakeDocker;

type TestResult = Result<(), Box<dyn Error>>;

fn single_container_plan() -> TaskPlan {
    let project: ProjectFile = serde_yaml::from_str(
        r#"
containers:
  svc:
    image: alpine:3.19
    command: echo hello
tasks:
  hello:
    run:
      container: svc
"#,
    )
    .unwrap();
    TaskPlan::resolve(&project, "hello", vec![], Path::new(".")).unwrap()
}

fn position(events: &[RecordedEvent], predicate: impl Fn(&TaskEvent) -> bool) -> usize {
    events
        .iter()
        .position(|recorded| predicate(&recorded.event))
        .expect("expected event not found")
}

#[tokio::test]
async fn single_container_run_walks_the_full_lifecycle_and_exits_zero() -> TestResult {
    let fake = FakeDocker::new();
    let docker: Arc<dyn DockerApi> = fake.clone();

    let ctx = Arc::new(TaskContext::new(single_container_plan()));
    let (runtime, _handle) = Runtime::new(ctx.clone(), docker, 4);

    let result = tokio::time::timeout(std::time::Duration::from_secs(10), runtime.run()).await?;

    assert_eq!(result.exit_code, 0);
    assert!(result.first_failure.is_none());
    assert!(result.cleanup_failures.is_empty());
    assert!(result.succeeded());

    let events = ctx.events.all();

    let pulled = position(&events, |e| {
        matches!(e, TaskEvent::ImagePulled { container, .. } if container == "svc")
    });
    let network_created = position(&events, |e| {
        matches!(e, TaskEvent::TaskNetworkCreated { .. })
    });
    let created = position(&events, |e| {
        matches!(e, TaskEvent::ContainerCreated { container, .. } if container == "svc")
    });
    let started = position(&events, |e| {
        matches!(e, TaskEvent::ContainerStarted { container } if container == "svc")
    });
    let healthy = position(&events, |e| {
        matches!(e, TaskEvent::ContainerBecameHealthy { container } if container == "svc")
    });
    let exited = position(&events, |e| {
        matches!(
            e,
            TaskEvent::RunningContainerExited { container, exit_code: 0 } if container == "svc"
        )
    });
    let stopped = position(&events, |e| {
        matches!(e, TaskEvent::ContainerStopped { container } if container == "svc")
    });
    let removed = position(&events, |e| {
        matches!(e, TaskEvent::ContainerRemoved { container } if container == "svc")
    });
    let network_deleted = position(&events, |e| matches!(e, TaskEvent::TaskNetworkDeleted));

    // Lifecycle prefix ordering for the container.
    assert!(pulled < created);
    assert!(created < started);
    assert!(started < healthy);
    assert!(healthy < exited);
    assert!(exited < stopped);
    assert!(stopped < removed);

    // Network brackets every container's existence.
    assert!(network_created < created);
    assert!(removed < network_deleted);

    // Network balance: exactly one create, one delete.
    let creates = events
        .iter()
        .filter(|r| matches!(r.event, TaskEvent::TaskNetworkCreated { .. }))
        .count();
    assert_eq!(creates, 1);

    Ok(())
}

#[tokio::test]
async fn main_container_exit_code_becomes_the_task_exit_code() -> TestResult {
    let fake = FakeDocker::new();
    fake.set_exit_code("svc", 3);
    let docker: Arc<dyn DockerApi> = fake.clone();

    let ctx = Arc::new(TaskContext::new(single_container_plan()));
    let (runtime, _handle) = Runtime::new(ctx.clone(), docker, 4);

    let result = tokio::time::timeout(std::time::Duration::from_secs(10), runtime.run()).await?;

    // A non-zero exit of the task command is not a failure: cleanup runs
    // normally and the code is surfaced.
    assert_eq!(result.exit_code, 3);
    assert!(result.first_failure.is_none());
    assert!(ctx.container_removed("svc"));
    assert!(ctx.network_deleted());

    Ok(())
}
