// src/engine/cleanup.rs

//! Teardown planning.
//!
//! Once a run enters cleanup (main container exited, a failure occurred, or
//! the user interrupted), the run loop calls [`plan_cleanup`] after every
//! event. Each call recomputes the currently-safe teardown frontier from the
//! event log; the step queue's dedup makes repeated planning free.

use super::context::TaskContext;
use super::step::TaskStep;

/// Subject name used when recording a network cleanup failure.
pub const TASK_NETWORK_SUBJECT: &str = "task network";

/// Compute the teardown steps that are safe to run right now.
///
/// Ordering rules enforced here:
/// - a container is stopped only after every created container depending on
///   it is stopped (dependency-reverse order)
/// - a container is removed only after it is stopped
/// - the network is deleted only after every created container is removed
/// - temporary files are deleted last
///
/// Containers whose stop or remove already failed are treated as settled so
/// the frontier always drains; their failures are reported separately.
pub fn plan_cleanup(ctx: &TaskContext) -> Vec<TaskStep> {
    let mut steps = Vec::new();
    let created = ctx.created_containers();

    for name in created.iter() {
        if ctx.cleanup_given_up(name) {
            continue;
        }

        if !ctx.container_stopped(name) {
            // While a start/health-wait/run handler is still working on this
            // container, let it observe the abort and emit its terminal
            // event first; stopping underneath it would scramble the
            // recorded lifecycle.
            if lifecycle_step_active(ctx, name) {
                continue;
            }

            let dependents_stopped = ctx
                .graph
                .dependents_of(name)
                .iter()
                .filter(|dependent| ctx.container_created(dependent))
                .all(|dependent| {
                    ctx.container_stopped(dependent) || ctx.cleanup_given_up(dependent)
                });

            if dependents_stopped {
                steps.push(TaskStep::StopContainer {
                    container: name.clone(),
                });
            }
        } else if !ctx.container_removed(name) {
            steps.push(TaskStep::RemoveContainer {
                container: name.clone(),
            });
        }
    }

    let containers_settled = created
        .iter()
        .all(|name| ctx.container_removed(name) || ctx.cleanup_given_up(name));
    if !containers_settled || creation_steps_active(ctx) {
        return steps;
    }

    if ctx.queue.step_in_flight(&TaskStep::CreateTaskNetwork) {
        // The network may still come into existence; wait for its event.
        return steps;
    }

    let network_pending = ctx.network_id().is_some()
        && !ctx.network_deleted()
        && !ctx.cleanup_given_up(TASK_NETWORK_SUBJECT);
    if network_pending {
        steps.push(TaskStep::DeleteTaskNetwork);
        return steps;
    }

    // Network settled (never created, deleted, or given up): temporary
    // files go last.
    for path in ctx.temp_files() {
        let subject = path.display().to_string();
        if !ctx.temp_file_deleted(&path) && !ctx.cleanup_given_up(&subject) {
            steps.push(TaskStep::DeleteTemporaryFile { path });
        }
    }

    steps
}

fn lifecycle_step_active(ctx: &TaskContext, container: &str) -> bool {
    let steps = [
        TaskStep::StartContainer {
            container: container.to_string(),
        },
        TaskStep::WaitForContainerToBecomeHealthy {
            container: container.to_string(),
        },
        TaskStep::RunContainer {
            container: container.to_string(),
        },
    ];
    steps.iter().any(|step| ctx.queue.step_in_flight(step))
}

/// A `CreateContainer` still in flight may attach another container to the
/// network after we have already decided everything is settled.
fn creation_steps_active(ctx: &TaskContext) -> bool {
    ctx.plan.containers.keys().any(|name| {
        ctx.queue.step_in_flight(&TaskStep::CreateContainer {
            container: name.clone(),
        })
    })
}
