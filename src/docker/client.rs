// src/docker/client.rs

//! Bollard-backed [`DockerApi`] implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, InspectContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::{EndpointSettings, HealthConfig, HealthStatusEnum, HostConfig, PortBinding};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::docker::request::ContainerCreationRequest;
use crate::docker::types::{
    BuildProgress, ContainerHealth, ContainerInfo, ContainerIo, DockerContainer, DockerError,
    Image, ImageBuildRequest, OutputChunk, TaskNetwork,
};
use crate::docker::DockerApi;

/// Production Docker client. Connection defaults honour `DOCKER_HOST`,
/// `DOCKER_CERT_PATH` and `DOCKER_TLS_VERIFY`.
pub struct BollardDockerClient {
    docker: Docker,
}

impl BollardDockerClient {
    pub fn connect() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::Connection(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl DockerApi for BollardDockerClient {
    async fn build_image(
        &self,
        request: ImageBuildRequest,
        progress: mpsc::Sender<BuildProgress>,
    ) -> Result<Image, DockerError> {
        let options = BuildImageOptions::<String> {
            dockerfile: request.dockerfile,
            t: request.tag.clone(),
            buildargs: request.build_args.into_iter().collect(),
            rm: true,
            ..Default::default()
        };

        let mut stream =
            self.docker
                .build_image(options, None, Some(request.context_archive.into()));

        let mut image_id: Option<String> = None;
        while let Some(message) = stream.next().await {
            let info = message?;

            if let Some(error) = info.error {
                return Err(DockerError::Other(error));
            }
            if let Some(id) = info.aux.and_then(|aux| aux.id) {
                image_id = Some(id);
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    let _ = progress
                        .send(BuildProgress {
                            percent: parse_step_percent(line),
                            message: line.to_string(),
                        })
                        .await;
                }
            }
        }

        Ok(Image {
            id: image_id.unwrap_or(request.tag),
        })
    }

    async fn pull_image(&self, reference: &str) -> Result<Image, DockerError> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: reference.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(message) = stream.next().await {
            let info = message?;
            if let Some(status) = info.status {
                debug!(image = %reference, "pull: {}", status);
            }
        }

        Ok(Image {
            id: reference.to_string(),
        })
    }

    async fn create_network(&self, name: &str) -> Result<TaskNetwork, DockerError> {
        let response = self
            .docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                check_duplicate: true,
                ..Default::default()
            })
            .await?;

        Ok(TaskNetwork {
            id: response.id.unwrap_or_else(|| name.to_string()),
            name: name.to_string(),
        })
    }

    async fn delete_network(&self, id: &str) -> Result<(), DockerError> {
        self.docker.remove_network(id).await?;
        Ok(())
    }

    async fn create_container(
        &self,
        request: &ContainerCreationRequest,
    ) -> Result<DockerContainer, DockerError> {
        let config = translate_request(request);
        let response = self
            .docker
            .create_container(
                None::<bollard::container::CreateContainerOptions<String>>,
                config,
            )
            .await?;
        Ok(DockerContainer { id: response.id })
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, DockerError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let state = response.state.unwrap_or_default();
        let (health, last_health_log) = match state.health {
            Some(h) => {
                let status = match h.status {
                    Some(HealthStatusEnum::HEALTHY) => ContainerHealth::Healthy,
                    Some(HealthStatusEnum::UNHEALTHY) => ContainerHealth::Unhealthy,
                    Some(HealthStatusEnum::STARTING) => ContainerHealth::Starting,
                    _ => ContainerHealth::None,
                };
                let last = h
                    .log
                    .and_then(|log| log.last().and_then(|entry| entry.output.clone()));
                (status, last)
            }
            None => (ContainerHealth::None, None),
        };

        let health_interval = response
            .config
            .and_then(|c| c.healthcheck)
            .and_then(|h| h.interval)
            .filter(|n| *n > 0)
            .map(|n| Duration::from_nanos(n as u64));

        Ok(ContainerInfo {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
            health,
            last_health_log,
            health_interval,
        })
    }

    async fn attach_container(&self, id: &str) -> Result<ContainerIo, DockerError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        };

        let AttachContainerResults { output, input } =
            self.docker.attach_container(id, Some(options)).await?;

        let output = output
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(OutputChunk::Stdout(message.to_vec())))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        Some(Ok(OutputChunk::Stderr(message.to_vec())))
                    }
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(DockerError::from(e))),
                }
            })
            .boxed();

        Ok(ContainerIo { output, input })
    }

    async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Bollard reports a non-zero exit as this error; the code is the
            // container's exit code, not a transport failure.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(DockerError::Other(format!(
                "wait for container {} ended without a status",
                id
            ))),
        }
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), DockerError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker.stop_container(id, Some(options)).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}

fn translate_request(request: &ContainerCreationRequest) -> Config<String> {
    let host_config = HostConfig {
        network_mode: Some(request.host_config.network_mode.clone()),
        binds: Some(request.host_config.binds.clone()),
        port_bindings: Some(
            request
                .host_config
                .port_bindings
                .iter()
                .map(|(port, bindings)| {
                    (
                        port.clone(),
                        Some(
                            bindings
                                .iter()
                                .map(|b| PortBinding {
                                    host_ip: Some(b.host_ip.clone()),
                                    host_port: Some(b.host_port.clone()),
                                })
                                .collect(),
                        ),
                    )
                })
                .collect(),
        ),
        ..Default::default()
    };

    let healthcheck = HealthConfig {
        test: Some(request.healthcheck.test.clone()),
        interval: Some(request.healthcheck.interval as i64),
        retries: Some(request.healthcheck.retries as i64),
        start_period: Some(request.healthcheck.start_period as i64),
        ..Default::default()
    };

    let endpoints_config: HashMap<String, EndpointSettings> = request
        .networking_config
        .endpoints_config
        .iter()
        .map(|(network, endpoint)| {
            (
                network.clone(),
                EndpointSettings {
                    aliases: Some(endpoint.aliases.clone()),
                    ..Default::default()
                },
            )
        })
        .collect();

    Config {
        hostname: Some(request.hostname.clone()),
        user: request.user.clone(),
        attach_stdin: Some(request.attach_stdin),
        attach_stdout: Some(request.attach_stdout),
        attach_stderr: Some(request.attach_stderr),
        tty: Some(request.tty),
        open_stdin: Some(request.open_stdin),
        stdin_once: Some(request.stdin_once),
        env: Some(request.env.clone()),
        cmd: if request.cmd.is_empty() {
            None
        } else {
            Some(request.cmd.clone())
        },
        healthcheck: Some(healthcheck),
        image: Some(request.image.clone()),
        working_dir: request.working_dir.clone(),
        host_config: Some(host_config),
        networking_config: Some(bollard::container::NetworkingConfig { endpoints_config }),
        ..Default::default()
    }
}

/// Derive a rough completion percentage from the daemon's `Step n/m` lines.
fn parse_step_percent(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("Step ")?;
    let (fraction, _) = rest.split_once(' ')?;
    let (current, total) = fraction.split_once('/')?;
    let current: u32 = current.parse().ok()?;
    let total: u32 = total.parse().ok()?;
    if total == 0 {
        return None;
    }
    Some(current * 100 / total)
}
