//! Docker daemon adapter for [`ContainerRuntime`], built on bollard.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HealthStatusEnum, HostConfig, PortBinding};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use futures::StreamExt;

use crate::domains::ranges::models::{HostBinding, PortMap};

use super::{ContainerRuntime, ContainerSpec, ContainerStatus, HealthStatus};

const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon. An explicit `DOCKER_HOST`-style address wins
    /// over the platform default socket.
    pub fn connect(docker_host: Option<&str>) -> Result<Self> {
        let docker = match docker_host.map(str::trim).filter(|h| !h.is_empty()) {
            Some(host) if host.starts_with("unix://") => Docker::connect_with_socket(
                host.trim_start_matches("unix://"),
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            Some(host) => {
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .context("connect to container daemon")?;
        Ok(Self { docker })
    }

    fn label_filters(terms: &[String]) -> HashMap<String, Vec<String>> {
        HashMap::from([("label".to_string(), terms.to_vec())])
    }
}

/// The daemon answers 304 when a start/stop is already in the requested
/// state; callers treat that as success.
fn ignore_not_modified(result: Result<(), bollard::errors::Error>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_networks(&self, label_filters: &[String]) -> Result<Vec<String>> {
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions {
                filters: Self::label_filters(label_filters),
            }))
            .await?;
        Ok(networks.into_iter().filter_map(|n| n.id).collect())
    }

    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<String> {
        let response = self
            .docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                labels: labels.clone(),
                ..Default::default()
            })
            .await?;
        response.id.context("network create returned no id")
    }

    async fn remove_network(&self, network_id: &str) -> Result<()> {
        self.docker.remove_network(network_id).await?;
        Ok(())
    }

    async fn list_containers(&self, label_filters: &[String]) -> Result<Vec<String>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: Self::label_filters(label_filters),
                ..Default::default()
            }))
            .await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let host_port = if port.host > 0 {
                port.host.to_string()
            } else {
                // Empty asks the daemon for an ephemeral host port.
                String::new()
            };
            exposed_ports.insert(port.key(), HashMap::new());
            port_bindings.insert(
                port.key(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port),
                }]),
            );
        }

        let endpoints = HashMap::from([(
            spec.network_name.clone(),
            EndpointSettings {
                network_id: Some(spec.network_id.clone()),
                ..Default::default()
            },
        )]);

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.command.is_empty() {
                None
            } else {
                Some(spec.command.clone())
            },
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            networking_config: Some(bollard::container::NetworkingConfig {
                endpoints_config: endpoints,
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    ..Default::default()
                }),
                config,
            )
            .await?;
        Ok(created.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        ignore_not_modified(
            self.docker
                .start_container(container_id, None::<StartContainerOptions<String>>)
                .await,
        )
    }

    async fn stop_container(&self, container_id: &str, grace_secs: i64) -> Result<()> {
        ignore_not_modified(
            self.docker
                .stop_container(container_id, Some(StopContainerOptions { t: grace_secs }))
                .await,
        )
    }

    async fn restart_container(&self, container_id: &str, grace_secs: i64) -> Result<()> {
        self.docker
            .restart_container(
                container_id,
                Some(RestartContainerOptions {
                    t: grace_secs as isize,
                }),
            )
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerStatus> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;

        let mut status = ContainerStatus::default();
        if let Some(state) = inspect.state {
            status.running = state.running.unwrap_or(false);
            status.health = state.health.map(|health| match health.status {
                Some(HealthStatusEnum::HEALTHY) => HealthStatus::Healthy,
                Some(HealthStatusEnum::UNHEALTHY) => HealthStatus::Unhealthy,
                _ => HealthStatus::Starting,
            });
        }
        if let Some(ports) = inspect.network_settings.and_then(|n| n.ports) {
            status.ports = convert_port_map(ports);
        }
        Ok(status)
    }

    async fn exec_status(&self, container_id: &str, command: &str) -> Result<Option<i64>> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-lc", command]),
                    ..Default::default()
                },
            )
            .await?;
        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await?;
        let inspect = self.docker.inspect_exec(&exec.id).await?;
        if inspect.running.unwrap_or(false) {
            return Ok(None);
        }
        Ok(inspect.exit_code)
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        Ok(self.docker.inspect_image(image).await.is_ok())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut progress = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(step) = progress.next().await {
            step?;
        }
        Ok(())
    }
}

fn convert_port_map(ports: HashMap<String, Option<Vec<PortBinding>>>) -> PortMap {
    ports
        .into_iter()
        .map(|(key, bindings)| {
            let bindings = bindings
                .unwrap_or_default()
                .into_iter()
                .map(|b| HostBinding {
                    host_ip: b.host_ip.unwrap_or_default(),
                    host_port: b.host_port.unwrap_or_default(),
                })
                .collect();
            (key, bindings)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_daemon_port_map() {
        let mut raw = HashMap::new();
        raw.insert(
            "80/tcp".to_string(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".into()),
                host_port: Some("32768".into()),
            }]),
        );
        raw.insert("52000/udp".to_string(), None);

        let ports = convert_port_map(raw);
        assert_eq!(ports["80/tcp"][0].host_port, "32768");
        assert!(ports["52000/udp"].is_empty());
    }
}
