// src/docker/types.rs

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Errors surfaced by [`DockerApi`](super::DockerApi) operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("could not connect to the Docker daemon: {0}")]
    Connection(String),

    #[error("Docker API call failed (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl DockerError {
    /// True when the daemon reported the subject missing. Stop, remove and
    /// delete operations treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::Api { status: 404, .. })
    }
}

impl From<bollard::errors::Error> for DockerError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => DockerError::Api {
                status: status_code,
                message,
            },
            other => DockerError::Other(other.to_string()),
        }
    }
}

/// An image the daemon knows about, by id or reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
}

/// The ephemeral bridge network created for one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNetwork {
    pub id: String,
    pub name: String,
}

/// A created Docker container instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerContainer {
    pub id: String,
}

/// Everything the image build endpoint needs; the caller owns creating the
/// tarred build context.
#[derive(Debug, Clone)]
pub struct ImageBuildRequest {
    pub tag: String,
    pub dockerfile: String,
    pub build_args: BTreeMap<String, String>,
    pub context_archive: Vec<u8>,
}

/// One line of build output, with a completion estimate when the daemon's
/// `Step n/m` markers allow one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProgress {
    pub percent: Option<u32>,
    pub message: String,
}

/// Health as reported by container inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerHealth {
    /// The image defines no health check.
    None,
    Starting,
    Healthy,
    Unhealthy,
}

/// Snapshot of a container's state.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub running: bool,
    pub exit_code: Option<i64>,
    pub health: ContainerHealth,
    /// Output of the most recent health check, for failure reporting.
    pub last_health_log: Option<String>,
    /// The check interval the container actually carries, used to pace
    /// health polling.
    pub health_interval: Option<Duration>,
}

/// A chunk of container output from the attach stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Bi-directional stdio of an attached container.
pub struct ContainerIo {
    pub output: BoxStream<'static, Result<OutputChunk, DockerError>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}
