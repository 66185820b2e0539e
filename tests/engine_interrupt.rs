mod support;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskdock::config::model::ProjectFile;
use taskdock::docker::DockerApi;
use taskdock::engine::{Runtime, TaskContext, TaskEvent, TaskStep};
use taskdock::plan::TaskPlan;

use support::FakeDocker;

type TestResult = Result<(), Box<dyn Error>>;

fn long_running_plan() -> TaskPlan {
    let project: ProjectFile = serde_yaml::from_str(
        r#"
containers:
  svc:
    image: alpine:3.19
    command: sleep infinity
tasks:
  serve:
    run:
      container: svc
"#,
    )
    .unwrap();
    TaskPlan::resolve(&project, "serve", vec![], Path::new(".")).unwrap()
}

/// Poll until the run step has actually attached to the container, so an
/// interrupt lands mid-run rather than before it.
async fn wait_for_attach(fake: &FakeDocker, hostname: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !fake.attached_hostnames().contains(&hostname.to_string()) {
        if Instant::now() > deadline {
            panic!("run step never attached");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn interrupt_during_run_stops_the_container_and_completes_cleanup() -> TestResult {
    let fake = FakeDocker::new();
    fake.mark_long_running("svc");
    let docker: Arc<dyn DockerApi> = fake.clone();

    let ctx = Arc::new(TaskContext::new(long_running_plan()));
    let (runtime, handle) = Runtime::new(ctx.clone(), docker, 4);
    let run = tokio::spawn(runtime.run());

    wait_for_attach(&fake, "svc").await;
    assert!(ctx.queue.step_in_flight(&TaskStep::RunContainer {
        container: "svc".to_string(),
    }));

    handle.interrupt().await;

    let result = tokio::time::timeout(Duration::from_secs(10), run).await??;

    assert_ne!(result.exit_code, 0);
    assert_eq!(
        result.first_failure.as_deref(),
        Some("the task was interrupted")
    );

    let events = ctx.events.all();
    assert!(events
        .iter()
        .any(|r| matches!(r.event, TaskEvent::UserInterrupted)));

    // The stopped container reports the usual SIGKILL-ish code and it is
    // surfaced as the exit code.
    assert!(events.iter().any(|r| matches!(
        r.event,
        TaskEvent::RunningContainerExited { exit_code: 137, .. }
    )));
    assert_eq!(result.exit_code, 137);

    // Cleanup completeness: everything created was removed, the network is
    // gone, and nothing was left for the user to clean up by hand.
    for name in ctx.created_containers() {
        assert!(ctx.container_removed(&name), "container {name} not removed");
    }
    assert!(ctx.network_deleted());
    assert!(result.cleanup_failures.is_empty());

    // The exit was recorded before the stop, keeping the lifecycle ordered.
    let exited = events
        .iter()
        .position(|r| matches!(r.event, TaskEvent::RunningContainerExited { .. }))
        .unwrap();
    let stopped = events
        .iter()
        .position(|r| matches!(r.event, TaskEvent::ContainerStopped { .. }))
        .unwrap();
    assert!(exited < stopped);

    Ok(())
}

#[tokio::test]
async fn second_interrupt_escalates_to_an_immediate_kill() -> TestResult {
    let fake = FakeDocker::new();
    fake.mark_long_running("svc");
    // The container shrugs off the graceful stop, like a process ignoring
    // SIGTERM; only a zero-grace kill ends it.
    fake.ignore_graceful_stop("svc");
    let docker: Arc<dyn DockerApi> = fake.clone();

    let ctx = Arc::new(TaskContext::new(long_running_plan()));
    let (runtime, handle) = Runtime::new(ctx.clone(), docker, 4);
    let run = tokio::spawn(runtime.run());

    wait_for_attach(&fake, "svc").await;

    handle.interrupt().await;

    // The first interrupt requests a graceful stop with a real grace
    // period; the container keeps running through it.
    let deadline = Instant::now() + Duration::from_secs(5);
    while fake.stop_requests().is_empty() {
        if Instant::now() > deadline {
            panic!("first interrupt never requested a stop");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let (hostname, grace) = fake.stop_requests()[0].clone();
    assert_eq!(hostname, "svc");
    assert!(!grace.is_zero());

    handle.interrupt().await;

    let result = tokio::time::timeout(Duration::from_secs(10), run).await??;

    // The second interrupt re-issued the stop with no grace at all.
    assert!(fake
        .stop_requests()
        .iter()
        .any(|(host, grace)| host == "svc" && grace.is_zero()));

    // Cleanup still ran to completion.
    assert_eq!(result.exit_code, 137);
    for name in ctx.created_containers() {
        assert!(ctx.container_removed(&name), "container {name} not removed");
    }
    assert!(ctx.network_deleted());
    assert!(result.cleanup_failures.is_empty());

    Ok(())
}
