// src/engine/context.rs

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::plan::{ContainerGraph, TaskPlan};

use super::event::{ContainerName, EventStore, TaskEvent};
use super::step::StepQueue;

/// Default grace given to `docker stop` before the daemon kills the process.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// A cleanup operation that was attempted and given up on. Reported in the
/// final summary; never retried.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    /// The container name, or `"task network"`, or a temporary file path.
    pub subject: String,
    pub message: String,
}

/// Per-run state shared between the run loop, the reactor, the cleanup
/// planner and the step handlers.
///
/// The event store and step queue are the only mutable state that scheduling
/// decisions read; everything else here is either immutable (plan, graph,
/// network name) or monotonic flags and append-only bookkeeping.
pub struct TaskContext {
    pub plan: Arc<TaskPlan>,
    pub graph: ContainerGraph,
    pub events: EventStore,
    pub queue: StepQueue,
    /// Deterministic per-run network name derived from a fresh UUID.
    pub network_name: String,

    aborting: AtomicBool,
    cleanup_started: AtomicBool,
    force_stop: AtomicBool,
    temp_files: Mutex<Vec<PathBuf>>,
    cleanup_failures: Mutex<Vec<CleanupFailure>>,
}

impl TaskContext {
    pub fn new(plan: TaskPlan) -> Self {
        let graph = ContainerGraph::from_plan(&plan);
        Self {
            plan: Arc::new(plan),
            graph,
            events: EventStore::new(),
            queue: StepQueue::new(),
            network_name: format!("taskdock-{}", Uuid::new_v4()),
            aborting: AtomicBool::new(false),
            cleanup_started: AtomicBool::new(false),
            force_stop: AtomicBool::new(false),
            temp_files: Mutex::new(Vec::new()),
            cleanup_failures: Mutex::new(Vec::new()),
        }
    }

    // Run-state flags. All monotonic: once set they stay set for the run.

    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }

    pub fn begin_aborting(&self) {
        self.aborting.store(true, Ordering::SeqCst);
    }

    pub fn cleanup_started(&self) -> bool {
        self.cleanup_started.load(Ordering::SeqCst)
    }

    pub fn begin_cleanup(&self) {
        self.cleanup_started.store(true, Ordering::SeqCst);
    }

    pub fn force_stop(&self) {
        self.force_stop.store(true, Ordering::SeqCst);
    }

    /// True once the user has interrupted a second time; stops already in
    /// progress escalate to an immediate kill.
    pub fn force_stop_requested(&self) -> bool {
        self.force_stop.load(Ordering::SeqCst)
    }

    /// Grace period for container stops: zero once the user has interrupted
    /// twice, the default otherwise.
    pub fn stop_grace(&self) -> Duration {
        if self.force_stop.load(Ordering::SeqCst) {
            Duration::ZERO
        } else {
            DEFAULT_STOP_GRACE
        }
    }

    // Temporary files owned by the run (build contexts, injected config).

    pub fn register_temp_file(&self, path: PathBuf) {
        self.temp_files
            .lock()
            .expect("temp file lock poisoned")
            .push(path);
    }

    pub fn temp_files(&self) -> Vec<PathBuf> {
        self.temp_files
            .lock()
            .expect("temp file lock poisoned")
            .clone()
    }

    // Cleanup bookkeeping.

    pub fn record_cleanup_failure(&self, subject: impl Into<String>, message: impl Into<String>) {
        self.cleanup_failures
            .lock()
            .expect("cleanup failure lock poisoned")
            .push(CleanupFailure {
                subject: subject.into(),
                message: message.into(),
            });
    }

    pub fn cleanup_failures(&self) -> Vec<CleanupFailure> {
        self.cleanup_failures
            .lock()
            .expect("cleanup failure lock poisoned")
            .clone()
    }

    /// True when a cleanup step for this subject failed; the planner treats
    /// the subject as settled rather than waiting on it forever.
    pub fn cleanup_given_up(&self, subject: &str) -> bool {
        self.cleanup_failures
            .lock()
            .expect("cleanup failure lock poisoned")
            .iter()
            .any(|failure| failure.subject == subject)
    }

    // Views derived from the event store. These scan the log rather than
    // maintaining separate maps, so there is exactly one source of truth.

    /// The image to create this container from, once built or pulled.
    pub fn image_for(&self, container: &str) -> Option<String> {
        self.events.first_where(|e| match e {
            TaskEvent::ImageBuilt { container: c, .. }
            | TaskEvent::ImagePulled { container: c, .. } => c == container,
            _ => false,
        }).and_then(|e| match e {
            TaskEvent::ImageBuilt { image, .. } | TaskEvent::ImagePulled { image, .. } => {
                Some(image)
            }
            _ => None,
        })
    }

    pub fn image_ready(&self, container: &str) -> bool {
        self.image_for(container).is_some()
    }

    /// The created network's id, if creation has succeeded.
    pub fn network_id(&self) -> Option<String> {
        self.events.first_where(|e| matches!(e, TaskEvent::TaskNetworkCreated { .. }))
            .and_then(|e| match e {
                TaskEvent::TaskNetworkCreated { network } => Some(network),
                _ => None,
            })
    }

    pub fn network_deleted(&self) -> bool {
        self.events
            .any(|e| matches!(e, TaskEvent::TaskNetworkDeleted))
    }

    /// The Docker id of a created container.
    pub fn docker_id_for(&self, container: &str) -> Option<String> {
        self.events.first_where(|e| {
            matches!(e, TaskEvent::ContainerCreated { container: c, .. } if c == container)
        })
        .and_then(|e| match e {
            TaskEvent::ContainerCreated { docker_id, .. } => Some(docker_id),
            _ => None,
        })
    }

    pub fn container_created(&self, container: &str) -> bool {
        self.docker_id_for(container).is_some()
    }

    pub fn container_started(&self, container: &str) -> bool {
        self.events
            .any(|e| matches!(e, TaskEvent::ContainerStarted { container: c } if c == container))
    }

    pub fn container_healthy(&self, container: &str) -> bool {
        self.events.any(
            |e| matches!(e, TaskEvent::ContainerBecameHealthy { container: c } if c == container),
        )
    }

    pub fn container_stopped(&self, container: &str) -> bool {
        self.events
            .any(|e| matches!(e, TaskEvent::ContainerStopped { container: c } if c == container))
    }

    pub fn container_removed(&self, container: &str) -> bool {
        self.events
            .any(|e| matches!(e, TaskEvent::ContainerRemoved { container: c } if c == container))
    }

    pub fn temp_file_deleted(&self, path: &PathBuf) -> bool {
        self.events
            .any(|e| matches!(e, TaskEvent::TemporaryFileDeleted { path: p } if p == path))
    }

    /// All declared dependencies of `container` are healthy.
    pub fn dependencies_healthy(&self, container: &str) -> bool {
        self.graph
            .dependencies_of(container)
            .iter()
            .all(|dep| self.container_healthy(dep))
    }

    /// Names of every container with a `ContainerCreated` event, in the
    /// plan's (stable) order.
    pub fn created_containers(&self) -> Vec<ContainerName> {
        self.plan
            .containers
            .keys()
            .filter(|name| self.container_created(name))
            .cloned()
            .collect()
    }

    /// Exit code of the main container, once it has exited.
    pub fn main_exit_code(&self) -> Option<i64> {
        let main = &self.plan.main_container;
        self.events.first_where(|e| {
            matches!(e, TaskEvent::RunningContainerExited { container, .. } if container == main)
        })
        .and_then(|e| match e {
            TaskEvent::RunningContainerExited { exit_code, .. } => Some(exit_code),
            _ => None,
        })
    }

    pub fn has_failure(&self) -> bool {
        self.events.any(|e| e.is_failure())
    }

    /// Description of the first failure observed, for the summary.
    pub fn first_failure(&self) -> Option<String> {
        self.events
            .first_where(|e| e.is_failure())
            .and_then(|e| e.failure_description())
    }
}
