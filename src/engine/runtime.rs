// src/engine/runtime.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::docker::DockerApi;
use crate::exec::Executor;

use super::cleanup::plan_cleanup;
use super::context::{CleanupFailure, TaskContext};
use super::event::{StepId, TaskEvent};
use super::reactor;
use super::step::TaskStep;

/// A second interrupt arriving within this window escalates to an immediate
/// kill (stop grace drops to zero). Cleanup still runs.
const SECOND_INTERRUPT_WINDOW: Duration = Duration::from_secs(5);

/// Messages sent into the run loop from step handlers and the signal
/// handler.
///
/// The idea is that:
/// - step handlers send `Event`
/// - the executor sends `StepFinished` when a handler returns
/// - SIGINT/SIGTERM handling sends `Interrupted`
#[derive(Debug)]
pub enum RuntimeMessage {
    Event {
        step: Option<StepId>,
        event: TaskEvent,
    },
    StepFinished {
        step: TaskStep,
    },
    Interrupted,
}

/// Handle for delivering interrupts into a running engine.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<RuntimeMessage>,
}

impl RuntimeHandle {
    pub async fn interrupt(&self) {
        let _ = self.tx.send(RuntimeMessage::Interrupted).await;
    }
}

/// Outcome of one task run.
#[derive(Debug)]
pub struct TaskRunResult {
    pub exit_code: i64,
    pub first_failure: Option<String>,
    pub cleanup_failures: Vec<CleanupFailure>,
}

impl TaskRunResult {
    pub fn succeeded(&self) -> bool {
        self.first_failure.is_none() && self.cleanup_failures.is_empty()
    }
}

/// The run loop.
///
/// Responsibilities:
/// - own every event store append, in message-arrival order
/// - feed each event through the reactor (and the cleanup planner once
///   teardown has begun) and enqueue the resulting steps
/// - dispatch ready steps onto the executor pool
/// - terminate when the queue is empty and no step is in flight
pub struct Runtime {
    ctx: Arc<TaskContext>,
    executor: Executor,
    messages_rx: mpsc::Receiver<RuntimeMessage>,
    last_interrupt: Option<Instant>,
}

impl Runtime {
    pub fn new(
        ctx: Arc<TaskContext>,
        docker: Arc<dyn DockerApi>,
        workers: usize,
    ) -> (Self, RuntimeHandle) {
        let (tx, rx) = mpsc::channel::<RuntimeMessage>(64);
        let executor = Executor::new(docker, ctx.clone(), tx.clone(), workers);

        (
            Self {
                ctx,
                executor,
                messages_rx: rx,
                last_interrupt: None,
            },
            RuntimeHandle { tx },
        )
    }

    /// Drive the run to quiescence and report the outcome.
    pub async fn run(mut self) -> TaskRunResult {
        info!(task = %self.ctx.plan.task_name, "task run started");

        for step in reactor::seed(&self.ctx) {
            self.ctx.queue.enqueue(step);
        }
        self.dispatch_ready();

        while let Some(message) = self.messages_rx.recv().await {
            match message {
                RuntimeMessage::Event { step, event } => self.handle_event(step, event),
                RuntimeMessage::StepFinished { step } => {
                    debug!(?step, "step finished");
                    self.ctx.queue.step_finished(&step);
                    // A finished step can unblock teardown that was waiting
                    // on it (e.g. the main container's run step).
                    self.plan_cleanup_if_started();
                }
                RuntimeMessage::Interrupted => self.handle_interrupt(),
            }

            self.dispatch_ready();
            if self.ctx.queue.is_idle() {
                break;
            }
        }

        let result = self.result();
        info!(
            task = %self.ctx.plan.task_name,
            exit_code = result.exit_code,
            "task run finished"
        );
        result
    }

    fn handle_event(&mut self, step: Option<StepId>, event: TaskEvent) {
        debug!(?event, "event received");
        self.ctx.events.append(event.clone(), step);

        if event.is_failure() {
            if let Some(description) = event.failure_description() {
                warn!("{}", description);
            }
            self.ctx.begin_aborting();
            self.ctx.begin_cleanup();
        }
        if matches!(event, TaskEvent::RunningContainerExited { .. }) {
            self.ctx.begin_cleanup();
        }

        for follow_up in reactor::react(&event, &self.ctx) {
            self.ctx.queue.enqueue(follow_up);
        }
        self.plan_cleanup_if_started();
    }

    fn handle_interrupt(&mut self) {
        let now = Instant::now();
        match self.last_interrupt {
            None => {
                info!("interrupt received; stopping the task and cleaning up");
                self.last_interrupt = Some(now);
                self.handle_event(None, TaskEvent::UserInterrupted);
            }
            Some(previous) => {
                if now.duration_since(previous) <= SECOND_INTERRUPT_WINDOW {
                    warn!("second interrupt; containers will be stopped without grace");
                    self.ctx.force_stop();
                }
                self.last_interrupt = Some(now);
            }
        }
    }

    fn plan_cleanup_if_started(&self) {
        if !self.ctx.cleanup_started() {
            return;
        }
        for step in plan_cleanup(&self.ctx) {
            self.ctx.queue.enqueue(step);
        }
    }

    fn dispatch_ready(&self) {
        while let Some(step) = self.ctx.queue.pop() {
            self.executor.dispatch(step);
        }
    }

    fn result(&self) -> TaskRunResult {
        let exit_code = match (self.ctx.main_exit_code(), self.ctx.has_failure()) {
            (Some(code), false) => code,
            // A captured exit code wins, but a clean exit must not mask a
            // failure elsewhere in the run.
            (Some(code), true) => {
                if code != 0 {
                    code
                } else {
                    1
                }
            }
            (None, true) => 1,
            (None, false) => 0,
        };

        TaskRunResult {
            exit_code,
            first_failure: self.ctx.first_failure(),
            cleanup_failures: self.ctx.cleanup_failures(),
        }
    }
}
