// src/docker/request.rs

//! Typed `/containers/create` request body.
//!
//! Field names, ordering and omissions follow the Docker Engine API: the
//! serialised form of [`ContainerCreationRequest`] is exactly what goes over
//! the wire, so serialisation must be deterministic (`BTreeMap`s, fixed
//! struct order).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::plan::model::Container;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerCreationRequest {
    #[serde(rename = "AttachStdin")]
    pub attach_stdin: bool,
    #[serde(rename = "AttachStdout")]
    pub attach_stdout: bool,
    #[serde(rename = "AttachStderr")]
    pub attach_stderr: bool,
    #[serde(rename = "Tty")]
    pub tty: bool,
    #[serde(rename = "OpenStdin")]
    pub open_stdin: bool,
    #[serde(rename = "StdinOnce")]
    pub stdin_once: bool,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Cmd", skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "WorkingDir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(rename = "User", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "Env")]
    pub env: Vec<String>,
    #[serde(rename = "HostConfig")]
    pub host_config: HostConfig,
    #[serde(rename = "Healthcheck")]
    pub healthcheck: Healthcheck,
    #[serde(rename = "NetworkingConfig")]
    pub networking_config: NetworkingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostConfig {
    #[serde(rename = "NetworkMode")]
    pub network_mode: String,
    #[serde(rename = "Binds")]
    pub binds: Vec<String>,
    #[serde(rename = "PortBindings")]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp")]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Healthcheck {
    #[serde(rename = "Test")]
    pub test: Vec<String>,
    #[serde(rename = "Interval")]
    pub interval: u64,
    #[serde(rename = "Retries")]
    pub retries: u64,
    #[serde(rename = "StartPeriod")]
    pub start_period: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkingConfig {
    #[serde(rename = "EndpointsConfig")]
    pub endpoints_config: BTreeMap<String, EndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointConfig {
    #[serde(rename = "Aliases")]
    pub aliases: Vec<String>,
}

impl ContainerCreationRequest {
    /// Build the creation request for a container.
    ///
    /// - `command` is the already-split command line (empty means "use the
    ///   image default", and `Cmd` is omitted from the wire JSON).
    /// - `extra_env` is the run-time environment override (the task's, for
    ///   the main container; empty otherwise), overlaid on the container's
    ///   declared environment.
    /// - A container-declared `TERM` wins over the host's; otherwise the
    ///   host `TERM` is forwarded when set.
    pub fn for_container(
        container: &Container,
        image: &str,
        command: Vec<String>,
        extra_env: &BTreeMap<String, String>,
        network_name: &str,
        host_term: Option<String>,
    ) -> Self {
        let mut merged: BTreeMap<String, String> = container.environment.clone();
        for (key, value) in extra_env {
            merged.insert(key.clone(), value.clone());
        }
        if !merged.contains_key("TERM") {
            if let Some(term) = host_term {
                merged.insert("TERM".to_string(), term);
            }
        }
        let env = merged
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let binds = container
            .volumes
            .iter()
            .map(|v| match &v.options {
                Some(options) => format!("{}:{}:{}", v.host_path, v.container_path, options),
                None => format!("{}:{}", v.host_path, v.container_path),
            })
            .collect();

        let mut port_bindings = BTreeMap::new();
        for port in container.ports.iter() {
            port_bindings.insert(
                format!("{}/tcp", port.container_port),
                vec![PortBinding {
                    host_ip: String::new(),
                    host_port: port.host_port.to_string(),
                }],
            );
        }

        let healthcheck = Healthcheck {
            test: match &container.health_check.command {
                Some(cmd) => vec!["CMD-SHELL".to_string(), cmd.clone()],
                None => Vec::new(),
            },
            interval: nanos(container.health_check.interval),
            retries: container.health_check.retries.unwrap_or(0) as u64,
            start_period: nanos(container.health_check.start_period),
        };

        let mut endpoints_config = BTreeMap::new();
        endpoints_config.insert(
            network_name.to_string(),
            EndpointConfig {
                aliases: vec![container.name.clone()],
            },
        );

        Self {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            open_stdin: true,
            stdin_once: true,
            image: image.to_string(),
            cmd: command,
            hostname: container.name.clone(),
            working_dir: container.working_dir.clone(),
            user: container.run_as.map(|u| format!("{}:{}", u.uid, u.gid)),
            env,
            host_config: HostConfig {
                network_mode: network_name.to_string(),
                binds,
                port_bindings,
            },
            healthcheck,
            networking_config: NetworkingConfig { endpoints_config },
        }
    }

    /// Serialise to the exact wire JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn nanos(duration: Option<std::time::Duration>) -> u64 {
    duration.map(|d| d.as_nanos() as u64).unwrap_or(0)
}
