// src/exec/executor.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use crate::docker::DockerApi;
use crate::engine::runtime::RuntimeMessage;
use crate::engine::{StepId, TaskContext, TaskEvent, TaskStep};

use super::step_runner::run_step;

/// How events flow from a step handler back to the run loop. Each sink is
/// bound to the identity of the step it reports for.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<RuntimeMessage>,
    step: StepId,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<RuntimeMessage>, step: StepId) -> Self {
        Self { tx, step }
    }

    pub async fn emit(&self, event: TaskEvent) {
        let _ = self
            .tx
            .send(RuntimeMessage::Event {
                step: Some(self.step),
                event,
            })
            .await;
    }
}

/// Bounded pool that executes steps.
///
/// Each dispatched step runs in its own Tokio task, gated by a semaphore so
/// at most `workers` handlers touch Docker at once. Handlers report events
/// through an [`EventSink`] and a `StepFinished` notice is always sent when
/// the handler returns, whatever happened inside it.
pub struct Executor {
    docker: Arc<dyn DockerApi>,
    ctx: Arc<TaskContext>,
    tx: mpsc::Sender<RuntimeMessage>,
    permits: Arc<Semaphore>,
    next_step_id: AtomicU64,
}

impl Executor {
    pub fn new(
        docker: Arc<dyn DockerApi>,
        ctx: Arc<TaskContext>,
        tx: mpsc::Sender<RuntimeMessage>,
        workers: usize,
    ) -> Self {
        Self {
            docker,
            ctx,
            tx,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            next_step_id: AtomicU64::new(1),
        }
    }

    /// Hand a popped step to the pool. Returns immediately.
    pub fn dispatch(&self, step: TaskStep) {
        let step_id = self.next_step_id.fetch_add(1, Ordering::SeqCst);
        let docker = self.docker.clone();
        let ctx = self.ctx.clone();
        let tx = self.tx.clone();
        let permits = self.permits.clone();

        debug!(?step, step_id, "dispatching step");
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                // The semaphore is never closed while the engine runs.
                Err(_) => return,
            };

            let sink = EventSink::new(tx.clone(), step_id);
            run_step(&step, &docker, &ctx, &sink).await;

            let _ = tx.send(RuntimeMessage::StepFinished { step }).await;
        });
    }
}

/// Worker pool size: one per logical CPU, never fewer than two.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}
