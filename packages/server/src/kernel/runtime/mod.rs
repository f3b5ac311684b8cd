//! Container-daemon abstraction.
//!
//! The worker and the room-action handlers talk to the daemon exclusively
//! through [`ContainerRuntime`], split into its three capability sets
//! (network, container, image). Resources are located by labels, never by
//! name; names exist only for humans. Tests substitute an in-memory fake.

mod docker;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::domains::ranges::models::PortMap;

pub use docker::DockerRuntime;

/// The label tuple that ties a daemon resource back to DB intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLabels {
    pub range_id: i64,
    pub team_id: i64,
    pub template_id: i64,
    pub service_name: String,
}

impl ResourceLabels {
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            ("range_id".to_string(), self.range_id.to_string()),
            ("team_id".to_string(), self.team_id.to_string()),
            ("template_id".to_string(), self.template_id.to_string()),
            ("service_name".to_string(), self.service_name.clone()),
        ])
    }

    /// `key=value` filter terms; a resource matches only if all apply.
    pub fn to_filters(&self) -> Vec<String> {
        vec![
            format!("range_id={}", self.range_id),
            format!("team_id={}", self.team_id),
            format!("template_id={}", self.template_id),
            format!("service_name={}", self.service_name),
        ]
    }
}

/// A container port to expose, already protocol-normalized.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub container: u16,
    /// 0 lets the daemon pick an ephemeral host port.
    pub host: u16,
    pub protocol: String,
}

impl PortSpec {
    pub fn key(&self) -> String {
        format!("{}/{}", self.container, self.protocol)
    }
}

/// Everything needed to create one service container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub ports: Vec<PortSpec>,
    pub labels: HashMap<String, String>,
    pub network_id: String,
    pub network_name: String,
}

/// Daemon-reported health, present only when the container defines a
/// healthcheck of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Check configured but no verdict yet.
    Starting,
}

/// Snapshot of a container from inspect.
#[derive(Debug, Clone, Default)]
pub struct ContainerStatus {
    pub running: bool,
    pub health: Option<HealthStatus>,
    pub ports: PortMap,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    // Networks
    async fn list_networks(&self, label_filters: &[String]) -> Result<Vec<String>>;
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<String>;
    async fn remove_network(&self, network_id: &str) -> Result<()>;

    // Containers
    async fn list_containers(&self, label_filters: &[String]) -> Result<Vec<String>>;
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String>;
    /// Starting an already-running container is not an error.
    async fn start_container(&self, container_id: &str) -> Result<()>;
    /// Stopping an already-stopped container is not an error.
    async fn stop_container(&self, container_id: &str, grace_secs: i64) -> Result<()>;
    async fn restart_container(&self, container_id: &str, grace_secs: i64) -> Result<()>;
    /// Force-removes the container together with its anonymous volumes.
    async fn remove_container(&self, container_id: &str) -> Result<()>;
    async fn inspect_container(&self, container_id: &str) -> Result<ContainerStatus>;
    /// Run a shell command inside the container; `Some(code)` once it has
    /// exited, `None` while still running.
    async fn exec_status(&self, container_id: &str, command: &str) -> Result<Option<i64>>;

    // Images
    async fn image_present(&self, image: &str) -> Result<bool>;
    async fn pull_image(&self, image: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_filter_terms() {
        let labels = ResourceLabels {
            range_id: 4,
            team_id: 2,
            template_id: 9,
            service_name: "web".into(),
        };
        let filters = labels.to_filters();
        assert!(filters.contains(&"range_id=4".to_string()));
        assert!(filters.contains(&"service_name=web".to_string()));
        assert_eq!(labels.to_map().len(), 4);
    }

    #[test]
    fn port_spec_key() {
        let port = PortSpec {
            container: 8080,
            host: 0,
            protocol: "tcp".into(),
        };
        assert_eq!(port.key(), "8080/tcp");
    }
}
