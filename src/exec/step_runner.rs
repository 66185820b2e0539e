// src/exec/step_runner.rs

//! One handler per step kind.
//!
//! Handlers are functions from (step, Docker client, context read-view) to
//! events: they never enqueue steps and never return errors to the run loop.
//! Every failure, including being asked to run while the task is already
//! stopping, is translated into a terminal event so scheduling and cleanup
//! can always make progress.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as AnyhowContext, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::docker::{
    BuildProgress, ContainerHealth, ContainerIo, DockerApi, DockerError, ImageBuildRequest,
    ContainerCreationRequest,
};
use crate::engine::cleanup::TASK_NETWORK_SUBJECT;
use crate::engine::{TaskContext, TaskEvent, TaskStep};
use crate::plan::ImageSource;

use super::command_line::parse_command_line;
use super::executor::EventSink;

const ABORTING_REASON: &str = "the task is stopping";

/// Fallbacks when neither the project file nor the image specify a value.
/// These match the Docker daemon's own health-check defaults.
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_RETRIES: u32 = 3;

/// Abort checks must stay responsive even when the configured health
/// interval is long.
const ABORT_POLL: Duration = Duration::from_millis(100);

pub async fn run_step(
    step: &TaskStep,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    debug!(?step, "running step");
    match step {
        TaskStep::BuildImage { container } => build_image(container, docker, ctx, sink).await,
        TaskStep::PullImage { container } => pull_image(container, docker, ctx, sink).await,
        TaskStep::CreateTaskNetwork => create_task_network(docker, ctx, sink).await,
        TaskStep::CreateContainer { container } => {
            create_container(container, docker, ctx, sink).await
        }
        TaskStep::StartContainer { container } => {
            start_container(container, docker, ctx, sink).await
        }
        TaskStep::WaitForContainerToBecomeHealthy { container } => {
            wait_for_container_healthy(container, docker, ctx, sink).await
        }
        TaskStep::RunContainer { container } => run_container(container, docker, ctx, sink).await,
        TaskStep::StopContainer { container } => stop_container(container, docker, ctx, sink).await,
        TaskStep::RemoveContainer { container } => {
            remove_container(container, docker, ctx, sink).await
        }
        TaskStep::DeleteTaskNetwork => delete_task_network(docker, ctx, sink).await,
        TaskStep::DeleteTemporaryFile { path } => delete_temporary_file(path, ctx, sink).await,
    }
}

async fn build_image(
    name: &str,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    let failed = |reason: String| TaskEvent::ImageBuildFailed {
        container: name.to_string(),
        reason,
    };

    if ctx.is_aborting() {
        sink.emit(failed(ABORTING_REASON.to_string())).await;
        return;
    }

    let Some(container) = ctx.plan.container(name) else {
        sink.emit(failed(format!("container '{}' is not part of this task", name)))
            .await;
        return;
    };
    let ImageSource::Build {
        context,
        dockerfile,
        build_args,
    } = &container.image
    else {
        sink.emit(failed(format!("container '{}' does not build an image", name)))
            .await;
        return;
    };

    // The build context goes through a run-owned temporary file so cleanup
    // can account for it.
    let archive_path = match write_build_context(context) {
        Ok(path) => path,
        Err(e) => {
            sink.emit(failed(format!("{:#}", e))).await;
            return;
        }
    };
    ctx.register_temp_file(archive_path.clone());

    let context_archive = match std::fs::read(&archive_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            sink.emit(failed(format!(
                "could not read build context archive {}: {}",
                archive_path.display(),
                e
            )))
            .await;
            return;
        }
    };

    let (progress_tx, mut progress_rx) = mpsc::channel::<BuildProgress>(16);
    let progress_sink = sink.clone();
    let progress_container = name.to_string();
    let forwarder = tokio::spawn(async move {
        let mut percent = 0;
        while let Some(progress) = progress_rx.recv().await {
            if let Some(p) = progress.percent {
                percent = p;
            }
            progress_sink
                .emit(TaskEvent::ImageBuildProgress {
                    container: progress_container.clone(),
                    percent,
                    message: progress.message,
                })
                .await;
        }
    });

    let request = ImageBuildRequest {
        tag: format!("taskdock-{}", name),
        dockerfile: dockerfile.clone().unwrap_or_else(|| "Dockerfile".to_string()),
        build_args: build_args.clone(),
        context_archive,
    };

    let result = docker.build_image(request, progress_tx).await;
    let _ = forwarder.await;

    match result {
        Ok(image) => {
            sink.emit(TaskEvent::ImageBuilt {
                container: name.to_string(),
                image: image.id,
            })
            .await
        }
        Err(e) => sink.emit(failed(e.to_string())).await,
    }
}

fn write_build_context(context: &Path) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("taskdock-build-{}.tar", Uuid::new_v4()));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("creating build context archive {}", path.display()))?;

    let mut builder = tar::Builder::new(file);
    builder
        .append_dir_all(".", context)
        .with_context(|| format!("archiving build context {}", context.display()))?;
    builder.finish().context("finishing build context archive")?;

    Ok(path)
}

async fn pull_image(
    name: &str,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    if ctx.is_aborting() {
        sink.emit(TaskEvent::ExecutionAborted {
            reason: ABORTING_REASON.to_string(),
        })
        .await;
        return;
    }

    let reference = match ctx.plan.container(name).map(|c| &c.image) {
        Some(ImageSource::Pull { reference }) => reference.clone(),
        _ => {
            sink.emit(TaskEvent::ExecutionAborted {
                reason: format!("container '{}' does not pull an image", name),
            })
            .await;
            return;
        }
    };

    match docker.pull_image(&reference).await {
        Ok(image) => {
            sink.emit(TaskEvent::ImagePulled {
                container: name.to_string(),
                image: image.id,
            })
            .await
        }
        Err(e) => {
            sink.emit(TaskEvent::ExecutionAborted {
                reason: format!(
                    "could not pull image '{}' for container '{}': {}",
                    reference, name, e
                ),
            })
            .await
        }
    }
}

async fn create_task_network(docker: &Arc<dyn DockerApi>, ctx: &Arc<TaskContext>, sink: &EventSink) {
    if ctx.is_aborting() {
        sink.emit(TaskEvent::TaskNetworkCreationFailed {
            reason: ABORTING_REASON.to_string(),
        })
        .await;
        return;
    }

    match docker.create_network(&ctx.network_name).await {
        Ok(network) => {
            sink.emit(TaskEvent::TaskNetworkCreated {
                network: network.id,
            })
            .await
        }
        Err(e) => {
            sink.emit(TaskEvent::TaskNetworkCreationFailed {
                reason: e.to_string(),
            })
            .await
        }
    }
}

async fn create_container(
    name: &str,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    let failed = |reason: String| TaskEvent::ContainerCreationFailed {
        container: name.to_string(),
        reason,
    };

    if ctx.is_aborting() {
        sink.emit(failed(ABORTING_REASON.to_string())).await;
        return;
    }

    let Some(container) = ctx.plan.container(name) else {
        sink.emit(failed(format!("container '{}' is not part of this task", name)))
            .await;
        return;
    };

    let mut command = match ctx.plan.command_for(name) {
        Some(command_line) => match parse_command_line(command_line) {
            Ok(words) => words,
            Err(e) => {
                sink.emit(TaskEvent::ExecutionAborted {
                    reason: e.to_string(),
                })
                .await;
                return;
            }
        },
        None => Vec::new(),
    };
    if ctx.plan.is_main(name) {
        command.extend(ctx.plan.extra_args.iter().cloned());
    }

    let Some(image) = ctx.image_for(name) else {
        sink.emit(failed(format!("image for container '{}' is not ready", name)))
            .await;
        return;
    };

    let no_extra_env = BTreeMap::new();
    let extra_env = if ctx.plan.is_main(name) {
        &ctx.plan.extra_env
    } else {
        &no_extra_env
    };

    let request = ContainerCreationRequest::for_container(
        container,
        &image,
        command,
        extra_env,
        &ctx.network_name,
        std::env::var("TERM").ok(),
    );

    match docker.create_container(&request).await {
        Ok(created) => {
            sink.emit(TaskEvent::ContainerCreated {
                container: name.to_string(),
                docker_id: created.id,
            })
            .await
        }
        Err(e) => sink.emit(failed(e.to_string())).await,
    }
}

async fn start_container(
    name: &str,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    let failed = |reason: String| TaskEvent::ContainerStartFailed {
        container: name.to_string(),
        reason,
    };

    if ctx.is_aborting() {
        sink.emit(failed(ABORTING_REASON.to_string())).await;
        return;
    }

    let Some(id) = ctx.docker_id_for(name) else {
        sink.emit(failed(format!("container '{}' was never created", name)))
            .await;
        return;
    };

    match docker.start_container(&id).await {
        Ok(()) => {
            sink.emit(TaskEvent::ContainerStarted {
                container: name.to_string(),
            })
            .await
        }
        Err(e) => sink.emit(failed(e.to_string())).await,
    }
}

async fn wait_for_container_healthy(
    name: &str,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    let unhealthy = |reason: String| TaskEvent::ContainerDidNotBecomeHealthy {
        container: name.to_string(),
        reason,
    };
    let healthy = TaskEvent::ContainerBecameHealthy {
        container: name.to_string(),
    };

    if ctx.is_aborting() {
        sink.emit(unhealthy(ABORTING_REASON.to_string())).await;
        return;
    }

    let Some(id) = ctx.docker_id_for(name) else {
        sink.emit(unhealthy(format!("container '{}' was never created", name)))
            .await;
        return;
    };

    let first = match docker.inspect_container(&id).await {
        Ok(info) => info,
        Err(e) => {
            sink.emit(unhealthy(format!("could not inspect container: {}", e)))
                .await;
            return;
        }
    };

    // No health check at all: the container is as healthy as it will get the
    // moment it is running. The main container may legitimately have exited
    // already (short task commands); its exit code is picked up by the run
    // step. A dependency that died before becoming healthy is a failure.
    if first.health == ContainerHealth::None {
        if first.running || ctx.plan.is_main(name) {
            sink.emit(healthy).await;
        } else {
            sink.emit(unhealthy(exited_reason(first.exit_code))).await;
        }
        return;
    }

    let declared = ctx
        .plan
        .container(name)
        .map(|c| c.health_check.clone())
        .unwrap_or_default();
    let interval = declared
        .interval
        .or(first.health_interval)
        .unwrap_or(DEFAULT_HEALTH_INTERVAL);
    let retries = declared.retries.unwrap_or(DEFAULT_HEALTH_RETRIES);
    let start_period = declared.start_period.unwrap_or(Duration::ZERO);

    // One extra interval of slack on top of the theoretical worst case.
    let budget = start_period + interval * retries + interval;
    let poll = interval.max(ABORT_POLL);
    let deadline = Instant::now() + budget;

    let mut info = first;
    let mut last_log = info.last_health_log.clone();

    loop {
        match info.health {
            ContainerHealth::Healthy => {
                sink.emit(healthy).await;
                return;
            }
            ContainerHealth::Unhealthy => {
                let reason = info
                    .last_health_log
                    .or(last_log)
                    .unwrap_or_else(|| "the health check reported unhealthy".to_string());
                sink.emit(unhealthy(reason)).await;
                return;
            }
            ContainerHealth::Starting | ContainerHealth::None => {
                if !info.running {
                    sink.emit(unhealthy(exited_reason(info.exit_code))).await;
                    return;
                }
                if let Some(log) = info.last_health_log.take() {
                    last_log = Some(log);
                }
            }
        }

        if Instant::now() >= deadline {
            let mut reason = format!(
                "container did not become healthy within {:.0?}",
                budget
            );
            if let Some(log) = last_log {
                reason.push_str(&format!(" (last health check output: {})", log.trim()));
            }
            sink.emit(unhealthy(reason)).await;
            return;
        }

        if sleep_or_abort(ctx, poll).await {
            sink.emit(unhealthy(ABORTING_REASON.to_string())).await;
            return;
        }

        info = match docker.inspect_container(&id).await {
            Ok(info) => info,
            Err(e) => {
                sink.emit(unhealthy(format!("could not inspect container: {}", e)))
                    .await;
                return;
            }
        };
    }
}

fn exited_reason(exit_code: Option<i64>) -> String {
    match exit_code {
        Some(code) => format!("container exited with code {} before becoming healthy", code),
        None => "container stopped running before becoming healthy".to_string(),
    }
}

/// Sleep for `duration` in short slices, returning early (and `true`) if the
/// run starts aborting.
async fn sleep_or_abort(ctx: &TaskContext, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if ctx.is_aborting() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(ABORT_POLL.min(deadline - now)).await;
    }
}

async fn run_container(
    name: &str,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    if ctx.is_aborting() {
        sink.emit(TaskEvent::ExecutionAborted {
            reason: ABORTING_REASON.to_string(),
        })
        .await;
        return;
    }

    let Some(id) = ctx.docker_id_for(name) else {
        sink.emit(TaskEvent::ExecutionAborted {
            reason: format!("container '{}' was never created", name),
        })
        .await;
        return;
    };

    let ContainerIo { mut output, input } = match docker.attach_container(&id).await {
        Ok(io) => io,
        Err(e) => {
            sink.emit(TaskEvent::ExecutionAborted {
                reason: format!("could not attach to container '{}': {}", name, e),
            })
            .await;
            return;
        }
    };

    // Forward the local terminal's input to the container until it exits.
    let stdin_task = tokio::spawn(async move {
        let mut input = input;
        let mut stdin = tokio::io::stdin();
        let _ = tokio::io::copy(&mut stdin, &mut input).await;
    });

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut stop_requested = false;
    let mut force_stop_sent = false;

    // Relay output until the stream ends (the container exited or the attach
    // channel broke). Already-buffered output is always drained; aborting
    // only adds a stop request on the side. The abort poll keeps running
    // after the first graceful stop so a second interrupt escalates to an
    // immediate kill.
    loop {
        tokio::select! {
            chunk = output.next() => match chunk {
                Some(Ok(crate::docker::OutputChunk::Stdout(bytes))) => {
                    let _ = stdout.write_all(&bytes).await;
                    let _ = stdout.flush().await;
                }
                Some(Ok(crate::docker::OutputChunk::Stderr(bytes))) => {
                    let _ = stderr.write_all(&bytes).await;
                    let _ = stderr.flush().await;
                }
                Some(Err(e)) => {
                    warn!(container = %name, error = %e, "error reading container output");
                    break;
                }
                None => break,
            },
            _ = tokio::time::sleep(ABORT_POLL), if !force_stop_sent => {
                if ctx.is_aborting() {
                    let force = ctx.force_stop_requested();
                    if !stop_requested || force {
                        stop_requested = true;
                        force_stop_sent = force;
                        let grace = if force {
                            Duration::ZERO
                        } else {
                            ctx.stop_grace()
                        };
                        let docker = docker.clone();
                        let id = id.clone();
                        let container = name.to_string();
                        tokio::spawn(async move {
                            debug!(
                                container = %container,
                                grace = ?grace,
                                "requesting stop of running task container"
                            );
                            let _ = docker.stop_container(&id, grace).await;
                        });
                    }
                }
            }
        }
    }

    stdin_task.abort();

    match docker.wait_container(&id).await {
        Ok(exit_code) => {
            sink.emit(TaskEvent::RunningContainerExited {
                container: name.to_string(),
                exit_code,
            })
            .await
        }
        Err(e) => {
            sink.emit(TaskEvent::ExecutionAborted {
                reason: format!(
                    "could not determine the exit code of container '{}': {}",
                    name, e
                ),
            })
            .await
        }
    }
}

async fn stop_container(
    name: &str,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    let stopped = TaskEvent::ContainerStopped {
        container: name.to_string(),
    };

    let Some(id) = ctx.docker_id_for(name) else {
        // Nothing was ever created, so there is nothing to stop.
        sink.emit(stopped).await;
        return;
    };

    match docker.stop_container(&id, ctx.stop_grace()).await {
        Ok(()) => sink.emit(stopped).await,
        Err(e) if already_stopped(&e) => sink.emit(stopped).await,
        Err(e) => {
            ctx.record_cleanup_failure(name, format!("could not stop container: {}", e));
            sink.emit(TaskEvent::ExecutionAborted {
                reason: format!("could not stop container '{}': {}", name, e),
            })
            .await;
        }
    }
}

/// Stopping a container that is gone (404) or not running (304) counts as
/// stopped.
fn already_stopped(error: &DockerError) -> bool {
    matches!(error, DockerError::Api { status: 404 | 304, .. })
}

async fn remove_container(
    name: &str,
    docker: &Arc<dyn DockerApi>,
    ctx: &Arc<TaskContext>,
    sink: &EventSink,
) {
    let removed = TaskEvent::ContainerRemoved {
        container: name.to_string(),
    };

    let Some(id) = ctx.docker_id_for(name) else {
        sink.emit(removed).await;
        return;
    };

    match docker.remove_container(&id, true).await {
        Ok(()) => sink.emit(removed).await,
        Err(e) if e.is_not_found() => sink.emit(removed).await,
        Err(e) => {
            ctx.record_cleanup_failure(name, format!("could not remove container: {}", e));
            sink.emit(TaskEvent::ExecutionAborted {
                reason: format!("could not remove container '{}': {}", name, e),
            })
            .await;
        }
    }
}

async fn delete_task_network(docker: &Arc<dyn DockerApi>, ctx: &Arc<TaskContext>, sink: &EventSink) {
    let Some(id) = ctx.network_id() else {
        sink.emit(TaskEvent::TaskNetworkDeleted).await;
        return;
    };

    match docker.delete_network(&id).await {
        Ok(()) => sink.emit(TaskEvent::TaskNetworkDeleted).await,
        Err(e) if e.is_not_found() => sink.emit(TaskEvent::TaskNetworkDeleted).await,
        Err(e) => {
            ctx.record_cleanup_failure(
                TASK_NETWORK_SUBJECT,
                format!("could not delete the task network: {}", e),
            );
            sink.emit(TaskEvent::ExecutionAborted {
                reason: format!("could not delete the task network: {}", e),
            })
            .await;
        }
    }
}

async fn delete_temporary_file(path: &Path, ctx: &Arc<TaskContext>, sink: &EventSink) {
    let deleted = TaskEvent::TemporaryFileDeleted {
        path: path.to_path_buf(),
    };

    match tokio::fs::remove_file(path).await {
        Ok(()) => sink.emit(deleted).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => sink.emit(deleted).await,
        Err(e) => {
            let subject = path.display().to_string();
            ctx.record_cleanup_failure(
                subject.clone(),
                format!("could not delete temporary file: {}", e),
            );
            sink.emit(TaskEvent::ExecutionAborted {
                reason: format!("could not delete temporary file {}: {}", subject, e),
            })
            .await;
        }
    }
}
