// src/engine/step.rs

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use super::event::ContainerName;

/// A discrete, executable operation against Docker or the local filesystem.
///
/// Steps carry only identity; everything a handler needs beyond this comes
/// from the task plan and the event store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStep {
    BuildImage { container: ContainerName },
    PullImage { container: ContainerName },
    CreateTaskNetwork,
    CreateContainer { container: ContainerName },
    StartContainer { container: ContainerName },
    WaitForContainerToBecomeHealthy { container: ContainerName },
    RunContainer { container: ContainerName },
    StopContainer { container: ContainerName },
    RemoveContainer { container: ContainerName },
    DeleteTaskNetwork,
    DeleteTemporaryFile { path: PathBuf },
}

#[derive(Debug, Default)]
struct QueueInner {
    ready: VecDeque<TaskStep>,
    /// Every step ever enqueued this run. Structural dedup against this set
    /// is what lets the reactor and the cleanup planner be re-invoked freely.
    seen: HashSet<TaskStep>,
    /// Steps whose handler has finished (successfully or not).
    finished: HashSet<TaskStep>,
    in_flight: usize,
}

/// FIFO of steps ready to execute, with best-effort dedup by structural
/// equality.
///
/// `pop` is non-blocking; the run loop supplies its own coordination.
#[derive(Debug, Default)]
pub struct StepQueue {
    inner: Mutex<QueueInner>,
}

impl StepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a step unless a structurally equal one was already enqueued
    /// at some point during this run. Returns whether it was accepted.
    pub fn enqueue(&self, step: TaskStep) -> bool {
        let mut inner = self.inner.lock().expect("step queue lock poisoned");
        if !inner.seen.insert(step.clone()) {
            debug!(?step, "step already enqueued this run; skipping");
            return false;
        }
        inner.ready.push_back(step);
        true
    }

    /// Pop the next ready step, marking it in flight.
    pub fn pop(&self) -> Option<TaskStep> {
        let mut inner = self.inner.lock().expect("step queue lock poisoned");
        let step = inner.ready.pop_front();
        if step.is_some() {
            inner.in_flight += 1;
        }
        step
    }

    /// Record that a previously popped step's handler has finished.
    pub fn step_finished(&self, step: &TaskStep) {
        let mut inner = self.inner.lock().expect("step queue lock poisoned");
        inner.finished.insert(step.clone());
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().expect("step queue lock poisoned").in_flight
    }

    /// A step that was dispatched but whose handler has not yet finished.
    pub fn step_in_flight(&self, step: &TaskStep) -> bool {
        let inner = self.inner.lock().expect("step queue lock poisoned");
        inner.seen.contains(step) && !inner.finished.contains(step)
    }

    /// Nothing ready and nothing running: the run is quiescent.
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock().expect("step queue lock poisoned");
        inner.ready.is_empty() && inner.in_flight == 0
    }
}
