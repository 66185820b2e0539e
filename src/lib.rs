// src/lib.rs

pub mod cli;
pub mod config;
pub mod docker;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod plan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ProjectFile;
use crate::docker::{BollardDockerClient, DockerApi};
use crate::engine::{Runtime, RuntimeHandle, TaskContext, TaskRunResult};
use crate::plan::TaskPlan;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - project file loading
/// - task plan resolution
/// - the Docker client
/// - the engine (context, executor, run loop)
/// - SIGINT/SIGTERM handling
///
/// Returns the process exit code: the main container's exit code on success,
/// non-zero on any failure.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let project = load_and_validate(&config_path)?;

    if args.list_tasks {
        print_task_list(&project);
        return Ok(0);
    }

    let task_name = args
        .task
        .clone()
        .ok_or_else(|| anyhow!("no task given; run `taskdock <task>` or `taskdock --list-tasks`"))?;

    let base_dir = config_root_dir(&config_path);
    let plan = TaskPlan::resolve(&project, &task_name, args.task_args.clone(), &base_dir)?;
    info!(
        task = %plan.task_name,
        containers = plan.containers.len(),
        "resolved task plan"
    );

    let docker: Arc<dyn DockerApi> = Arc::new(BollardDockerClient::connect()?);
    let ctx = Arc::new(TaskContext::new(plan));
    let (runtime, handle) = Runtime::new(ctx, docker, exec::default_worker_count());

    spawn_signal_listener(handle);

    let result = runtime.run().await;
    print_summary(&result);

    Ok(exit_code_for(&result))
}

/// SIGINT/SIGTERM → engine interrupt. A second signal within the grace
/// window escalates to an immediate kill; the engine handles that part.
fn spawn_signal_listener(handle: RuntimeHandle) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(e) => {
                eprintln!("failed to listen for SIGTERM: {e}");
                return;
            }
        };

        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            eprintln!("failed to listen for Ctrl+C");
                            return;
                        }
                    }
                    _ = terminate.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    eprintln!("failed to listen for Ctrl+C");
                    return;
                }
            }

            handle.interrupt().await;
        }
    });
}

/// Figure out the project root. Currently: directory containing the project
/// file, or `.`.
fn config_root_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Simple task listing: print tasks, their containers and commands.
fn print_task_list(project: &ProjectFile) {
    println!("tasks ({}):", project.tasks.len());
    for (name, task) in project.tasks.iter() {
        match &task.description {
            Some(description) => println!("  - {name}: {description}"),
            None => println!("  - {name}"),
        }
        println!("      container: {}", task.run.container);
        if let Some(command) = &task.run.command {
            println!("      command: {}", command);
        }
    }
}

fn print_summary(result: &TaskRunResult) {
    if let Some(failure) = &result.first_failure {
        eprintln!("taskdock: {}", failure);
    }
    for failure in &result.cleanup_failures {
        eprintln!(
            "taskdock: cleanup of {} failed: {}",
            failure.subject, failure.message
        );
    }
}

fn exit_code_for(result: &TaskRunResult) -> i32 {
    match i32::try_from(result.exit_code) {
        Ok(code) => code,
        Err(_) => 1,
    }
}
