// src/engine/event.rs

use std::path::PathBuf;
use std::sync::RwLock;
use std::time::SystemTime;

use thiserror::Error;

/// Public type alias for container names throughout the engine.
pub type ContainerName = String;

/// Identity of the step that produced an event. Synthetic events appended by
/// the run loop itself (e.g. `UserInterrupted`) carry none.
pub type StepId = u64;

/// Everything that can happen during one task run.
///
/// Events are the sole input to scheduling decisions: the reactor and the
/// cleanup planner read them, nothing ever mutates one after it is appended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    ImageBuilt {
        container: ContainerName,
        image: String,
    },
    ImagePulled {
        container: ContainerName,
        image: String,
    },
    ImageBuildProgress {
        container: ContainerName,
        percent: u32,
        message: String,
    },
    ImageBuildFailed {
        container: ContainerName,
        reason: String,
    },
    TaskNetworkCreated {
        network: String,
    },
    TaskNetworkCreationFailed {
        reason: String,
    },
    ContainerCreated {
        container: ContainerName,
        docker_id: String,
    },
    ContainerCreationFailed {
        container: ContainerName,
        reason: String,
    },
    ContainerStarted {
        container: ContainerName,
    },
    ContainerStartFailed {
        container: ContainerName,
        reason: String,
    },
    ContainerBecameHealthy {
        container: ContainerName,
    },
    ContainerDidNotBecomeHealthy {
        container: ContainerName,
        reason: String,
    },
    RunningContainerExited {
        container: ContainerName,
        exit_code: i64,
    },
    ContainerStopped {
        container: ContainerName,
    },
    ContainerRemoved {
        container: ContainerName,
    },
    TaskNetworkDeleted,
    TemporaryFileDeleted {
        path: PathBuf,
    },
    UserInterrupted,
    ExecutionAborted {
        reason: String,
    },
}

impl TaskEvent {
    /// True for events that abort the run: no further forward-progress steps
    /// are scheduled once one of these is observed.
    ///
    /// A non-zero exit of the main container is deliberately *not* a failure;
    /// its code is surfaced as the task's exit code instead.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskEvent::ImageBuildFailed { .. }
                | TaskEvent::TaskNetworkCreationFailed { .. }
                | TaskEvent::ContainerCreationFailed { .. }
                | TaskEvent::ContainerStartFailed { .. }
                | TaskEvent::ContainerDidNotBecomeHealthy { .. }
                | TaskEvent::UserInterrupted
                | TaskEvent::ExecutionAborted { .. }
        )
    }

    /// Human-readable description for the failure summary, `None` for
    /// non-failure events.
    pub fn failure_description(&self) -> Option<String> {
        match self {
            TaskEvent::ImageBuildFailed { container, reason } => Some(format!(
                "could not build image for container '{}': {}",
                container, reason
            )),
            TaskEvent::TaskNetworkCreationFailed { reason } => {
                Some(format!("could not create the task network: {}", reason))
            }
            TaskEvent::ContainerCreationFailed { container, reason } => Some(format!(
                "could not create container '{}': {}",
                container, reason
            )),
            TaskEvent::ContainerStartFailed { container, reason } => Some(format!(
                "could not start container '{}': {}",
                container, reason
            )),
            TaskEvent::ContainerDidNotBecomeHealthy { container, reason } => Some(format!(
                "container '{}' did not become healthy: {}",
                container, reason
            )),
            TaskEvent::UserInterrupted => Some("the task was interrupted".to_string()),
            TaskEvent::ExecutionAborted { reason } => Some(reason.clone()),
            _ => None,
        }
    }
}

/// One entry in the event store: the event plus when it happened and which
/// step produced it.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub at: SystemTime,
    pub step: Option<StepId>,
    pub event: TaskEvent,
}

/// Lookup failures on the event store. These indicate a bug in the caller's
/// reasoning about the run, not a runtime condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventStoreError {
    #[error("no event matched the query")]
    EventNotFound,
    #[error("more than one event matched the query")]
    EventNotUnique,
}

/// Append-only, totally ordered log of everything that happened during one
/// task run.
///
/// Writes are serialised (the run loop is the only appender); readers get a
/// snapshot consistent with a prefix of appends.
#[derive(Debug, Default)]
pub struct EventStore {
    inner: RwLock<Vec<RecordedEvent>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, returning its index in the log.
    pub fn append(&self, event: TaskEvent, step: Option<StepId>) -> usize {
        let mut events = self.inner.write().expect("event store lock poisoned");
        events.push(RecordedEvent {
            at: SystemTime::now(),
            step,
            event,
        });
        events.len() - 1
    }

    /// Snapshot of all events appended so far, in append order.
    pub fn all(&self) -> Vec<RecordedEvent> {
        self.inner.read().expect("event store lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("event store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any appended event matches the predicate.
    pub fn any(&self, predicate: impl Fn(&TaskEvent) -> bool) -> bool {
        self.inner
            .read()
            .expect("event store lock poisoned")
            .iter()
            .any(|recorded| predicate(&recorded.event))
    }

    /// Find the first event matching the predicate.
    pub fn first_where(&self, predicate: impl Fn(&TaskEvent) -> bool) -> Option<TaskEvent> {
        self.inner
            .read()
            .expect("event store lock poisoned")
            .iter()
            .find(|recorded| predicate(&recorded.event))
            .map(|recorded| recorded.event.clone())
    }

    /// Find the single event matching the predicate.
    ///
    /// Zero or multiple matches are programmer errors surfaced as
    /// [`EventStoreError`].
    pub fn single_where(
        &self,
        predicate: impl Fn(&TaskEvent) -> bool,
    ) -> Result<TaskEvent, EventStoreError> {
        let events = self.inner.read().expect("event store lock poisoned");
        let mut matches = events.iter().filter(|recorded| predicate(&recorded.event));

        let first = matches.next().ok_or(EventStoreError::EventNotFound)?;
        if matches.next().is_some() {
            return Err(EventStoreError::EventNotUnique);
        }
        Ok(first.event.clone())
    }
}
