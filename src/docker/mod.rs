// src/docker/mod.rs

//! Docker access layer.
//!
//! The engine talks to a [`DockerApi`] trait instead of the daemon directly.
//! This makes it easy to swap in a fake client in tests while keeping the
//! production implementation in [`client`].
//!
//! - [`request`] holds the typed `/containers/create` request body and its
//!   wire JSON.
//! - [`types`] holds the small typed results the engine consumes.
//! - [`client`] is the bollard-backed implementation used in production; it
//!   honours `DOCKER_HOST` and friends.

pub mod client;
pub mod request;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use client::BollardDockerClient;
pub use request::ContainerCreationRequest;
pub use types::{
    BuildProgress, ContainerHealth, ContainerInfo, ContainerIo, DockerContainer, DockerError,
    Image, ImageBuildRequest, OutputChunk, TaskNetwork,
};

/// Typed operations against the Docker daemon.
///
/// Implementations must be safe for concurrent use; step handlers call these
/// from parallel workers.
#[async_trait]
pub trait DockerApi: Send + Sync {
    /// Build an image from a tarred build context, reporting progress lines
    /// through `progress` as they stream in.
    async fn build_image(
        &self,
        request: ImageBuildRequest,
        progress: mpsc::Sender<BuildProgress>,
    ) -> Result<Image, DockerError>;

    /// Pull an image by reference.
    async fn pull_image(&self, reference: &str) -> Result<Image, DockerError>;

    /// Create a bridge network with the given name.
    async fn create_network(&self, name: &str) -> Result<TaskNetwork, DockerError>;

    /// Delete a network by id. "Not found" is an error here; callers decide
    /// whether it counts as success.
    async fn delete_network(&self, id: &str) -> Result<(), DockerError>;

    /// Create a container from a typed creation request.
    async fn create_container(
        &self,
        request: &ContainerCreationRequest,
    ) -> Result<DockerContainer, DockerError>;

    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    /// Inspect a container's run state and health.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, DockerError>;

    /// Attach to a container's stdio over the hijack channel.
    async fn attach_container(&self, id: &str) -> Result<ContainerIo, DockerError>;

    /// Block until the container exits and return its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, DockerError>;

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), DockerError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError>;
}
