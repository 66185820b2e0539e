// tests/support/mod.rs

//! Shared test support: a fake Docker client the engine can drive end to
//! end without a daemon.

// Each integration test crate includes this module; not all of them use
// every knob.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};

use taskdock::docker::{
    BuildProgress, ContainerCreationRequest, ContainerHealth, ContainerInfo, ContainerIo,
    DockerApi, DockerContainer, DockerError, Image, ImageBuildRequest, OutputChunk, TaskNetwork,
};

#[derive(Debug)]
struct FakeContainer {
    hostname: String,
    stopped_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    created_hostnames: Vec<String>,
    attached_hostnames: Vec<String>,
    /// Hostnames whose health check reports unhealthy immediately.
    unhealthy: HashSet<String>,
    /// Hostnames that keep running until stopped.
    long_running: HashSet<String>,
    /// Hostnames that shrug off graceful stops; only a zero-grace stop
    /// actually ends them.
    ignores_graceful_stop: HashSet<String>,
    /// Every stop request observed, as (hostname, grace).
    stop_requests: Vec<(String, Duration)>,
    /// Exit codes by hostname; defaults to 0 (or 137 when stopped).
    exit_codes: HashMap<String, i64>,
    /// Image references whose pull is artificially delayed.
    slow_pulls: HashMap<String, Duration>,
}

/// In-memory [`DockerApi`] implementation.
///
/// Containers are healthy-as-soon-as-running unless marked unhealthy, and
/// exit immediately with code 0 unless marked long-running.
#[derive(Debug, Default)]
pub struct FakeDocker {
    inner: Mutex<Inner>,
}

impl FakeDocker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_unhealthy(&self, hostname: &str) {
        self.lock().unhealthy.insert(hostname.to_string());
    }

    pub fn mark_long_running(&self, hostname: &str) {
        self.lock().long_running.insert(hostname.to_string());
    }

    pub fn set_exit_code(&self, hostname: &str, code: i64) {
        self.lock().exit_codes.insert(hostname.to_string(), code);
    }

    pub fn delay_pull(&self, reference: &str, delay: Duration) {
        self.lock()
            .slow_pulls
            .insert(reference.to_string(), delay);
    }

    pub fn created_hostnames(&self) -> Vec<String> {
        self.lock().created_hostnames.clone()
    }

    pub fn attached_hostnames(&self) -> Vec<String> {
        self.lock().attached_hostnames.clone()
    }

    pub fn ignore_graceful_stop(&self, hostname: &str) {
        self.lock()
            .ignores_graceful_stop
            .insert(hostname.to_string());
    }

    pub fn stop_requests(&self) -> Vec<(String, Duration)> {
        self.lock().stop_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake docker lock poisoned")
    }

    fn hostname_of(&self, id: &str) -> Result<String, DockerError> {
        self.lock()
            .containers
            .get(id)
            .map(|c| c.hostname.clone())
            .ok_or_else(|| DockerError::Api {
                status: 404,
                message: format!("no such container: {id}"),
            })
    }

    fn stopped_rx(&self, id: &str) -> Result<watch::Receiver<bool>, DockerError> {
        self.lock()
            .containers
            .get(id)
            .map(|c| c.stopped_rx.clone())
            .ok_or_else(|| DockerError::Api {
                status: 404,
                message: format!("no such container: {id}"),
            })
    }
}

#[async_trait]
impl DockerApi for FakeDocker {
    async fn build_image(
        &self,
        request: ImageBuildRequest,
        _progress: mpsc::Sender<BuildProgress>,
    ) -> Result<Image, DockerError> {
        Ok(Image { id: request.tag })
    }

    async fn pull_image(&self, reference: &str) -> Result<Image, DockerError> {
        let delay = self.lock().slow_pulls.get(reference).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Image {
            id: reference.to_string(),
        })
    }

    async fn create_network(&self, name: &str) -> Result<TaskNetwork, DockerError> {
        Ok(TaskNetwork {
            id: format!("{name}-id"),
            name: name.to_string(),
        })
    }

    async fn delete_network(&self, _id: &str) -> Result<(), DockerError> {
        Ok(())
    }

    async fn create_container(
        &self,
        request: &ContainerCreationRequest,
    ) -> Result<DockerContainer, DockerError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("container-{}", inner.next_id);

        let (stopped_tx, stopped_rx) = watch::channel(false);
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                hostname: request.hostname.clone(),
                stopped_tx,
                stopped_rx,
            },
        );
        inner.created_hostnames.push(request.hostname.clone());

        Ok(DockerContainer { id })
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.hostname_of(id).map(|_| ())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, DockerError> {
        let hostname = self.hostname_of(id)?;
        let inner = self.lock();

        if inner.unhealthy.contains(&hostname) {
            return Ok(ContainerInfo {
                running: true,
                exit_code: None,
                health: ContainerHealth::Unhealthy,
                last_health_log: Some("FATAL: not accepting connections".to_string()),
                health_interval: Some(Duration::from_millis(10)),
            });
        }

        let stopped = inner
            .containers
            .get(id)
            .map(|c| *c.stopped_rx.borrow())
            .unwrap_or(true);

        Ok(ContainerInfo {
            running: !stopped,
            exit_code: stopped.then_some(0),
            health: ContainerHealth::None,
            last_health_log: None,
            health_interval: None,
        })
    }

    async fn attach_container(&self, id: &str) -> Result<ContainerIo, DockerError> {
        let hostname = self.hostname_of(id)?;
        let long_running = {
            let mut inner = self.lock();
            inner.attached_hostnames.push(hostname.clone());
            inner.long_running.contains(&hostname)
        };

        let output = if long_running {
            // No output; the stream ends when the container is stopped.
            let rx = self.stopped_rx(id)?;
            stream::unfold(rx, |mut rx| async move {
                loop {
                    if *rx.borrow() {
                        return None::<(Result<OutputChunk, DockerError>, _)>;
                    }
                    if rx.changed().await.is_err() {
                        return None;
                    }
                }
            })
            .boxed()
        } else {
            stream::empty().boxed()
        };

        Ok(ContainerIo {
            output,
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        let hostname = self.hostname_of(id)?;
        let (long_running, exit_code) = {
            let inner = self.lock();
            (
                inner.long_running.contains(&hostname),
                inner.exit_codes.get(&hostname).copied(),
            )
        };

        if long_running {
            let mut rx = self.stopped_rx(id)?;
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            return Ok(exit_code.unwrap_or(137));
        }

        Ok(exit_code.unwrap_or(0))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), DockerError> {
        let mut inner = self.lock();
        let hostname = inner
            .containers
            .get(id)
            .map(|c| c.hostname.clone())
            .ok_or_else(|| DockerError::Api {
                status: 404,
                message: format!("no such container: {id}"),
            })?;
        inner.stop_requests.push((hostname.clone(), grace));

        // A container that ignores SIGTERM only dies to a zero-grace kill.
        if inner.ignores_graceful_stop.contains(&hostname) && !grace.is_zero() {
            return Ok(());
        }

        if let Some(container) = inner.containers.get(id) {
            let _ = container.stopped_tx.send(true);
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), DockerError> {
        self.hostname_of(id).map(|_| ())
    }
}
