//! The reconciliation worker.
//!
//! A long-running loop that claims one job at a time and drives the
//! container daemon until the range matches its template (provision), is
//! empty (destroy), or both in sequence (reset). Every ensure-* step is a
//! label-keyed upsert, so re-running a partially failed job converges
//! instead of leaking: existing resources are found by label and reused.
//!
//! Failure semantics: any error aborts the job, appends a `job.failed`
//! event, marks the range `failed`, and records the error on the job row.
//! Retries come only from the queue's attempt counter and the reaper.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domains::events::EventLevel;
use crate::domains::ranges::models::{PortMap, RangeStatus};
use crate::domains::templates::{
    normalize_network, Definition, RoomOptions, Service, ALLOWED_NETWORKS,
};
use crate::kernel::jobs::{ClaimedJob, JobQueue, JobType};
use crate::kernel::runtime::{
    ContainerRuntime, ContainerSpec, HealthStatus, PortSpec, ResourceLabels,
};

use super::env::build_service_env;
use super::store::{NewResource, ProvisionerStore};

const HEALTH_POLL: Duration = Duration::from_secs(2);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(60);
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ProvisionerStore>,
    runtime: Arc<dyn ContainerRuntime>,
    worker_id: String,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ProvisionerStore>,
        runtime: Arc<dyn ContainerRuntime>,
        worker_id: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            runtime,
            worker_id: worker_id.into(),
            poll_interval,
        }
    }

    /// Claim-and-converge until shutdown. One job in flight at a time;
    /// horizontal scale comes from running more worker processes.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.worker_id, "worker starting");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.queue.claim_next(&self.worker_id).await {
                Err(err) => {
                    error!(error = %err, "claim failed");
                    if sleep_or_shutdown(CLAIM_ERROR_BACKOFF, &shutdown).await {
                        break;
                    }
                }
                Ok(None) => {
                    if sleep_or_shutdown(self.poll_interval, &shutdown).await {
                        break;
                    }
                }
                Ok(Some(job)) => {
                    // A shutdown mid-job skips the terminal complete/fail on
                    // purpose: the job stays `running` and the reaper hands
                    // it back to the queue, where idempotent ensure-* calls
                    // make the re-run safe.
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            info!(job_id = job.id, "shutdown mid-job; leaving claim for the reaper");
                            break;
                        }
                        _ = self.process(&job) => {}
                    }
                }
            }
        }
        info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Handle one claimed job end to end, including its terminal queue call.
    pub async fn process(&self, job: &ClaimedJob) {
        let lease = match self.store.lock_range(job.range_id).await {
            Ok(lease) => Some(lease),
            Err(err) => {
                // Proceed unserialized rather than burn the attempt; the
                // destroy path's broad label matching keeps races safe.
                warn!(range_id = job.range_id, error = %err, "range lease unavailable");
                None
            }
        };

        match self.handle(job).await {
            Ok(()) => {
                if let Err(err) = self.queue.complete(job.id).await {
                    error!(job_id = job.id, error = %err, "failed to mark job succeeded");
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(job_id = job.id, job_type = %job.job_type, error = %message, "job failed");
                self.emit(
                    job,
                    EventLevel::Error,
                    "job.failed",
                    &message,
                    serde_json::json!({}),
                )
                .await;
                if let Err(err) = self
                    .store
                    .update_range_status(job.range_id, RangeStatus::Failed, None)
                    .await
                {
                    error!(range_id = job.range_id, error = %err, "failed to mark range failed");
                }
                if let Err(err) = self.queue.fail(job.id, &message).await {
                    error!(job_id = job.id, error = %err, "failed to mark job failed");
                }
            }
        }

        if let Some(lease) = lease {
            if let Err(err) = lease.release().await {
                warn!(range_id = job.range_id, error = %err, "range lease release failed");
            }
        }
    }

    async fn handle(&self, job: &ClaimedJob) -> Result<()> {
        match job.job_type.parse::<JobType>()? {
            JobType::Provision => self.provision(job).await,
            JobType::Destroy => self.destroy(job).await,
            JobType::Reset => {
                self.destroy(job).await?;
                self.provision(job).await
            }
        }
    }

    async fn provision(&self, job: &ClaimedJob) -> Result<()> {
        self.emit(
            job,
            EventLevel::Info,
            "provision.start",
            "provisioning started",
            serde_json::json!({}),
        )
        .await;
        self.store
            .update_range_status(job.range_id, RangeStatus::Provisioning, None)
            .await?;

        let (template_id, raw_definition) = self.store.get_range_template(job.range_id).await?;
        let definition: Definition =
            serde_json::from_value(raw_definition).context("parse template definition")?;
        let overrides = self.store.room_overrides(job.range_id).await?;

        let mut segments = BTreeSet::new();
        for service in &definition.services {
            let segment = normalize_network(&service.network);
            if !ALLOWED_NETWORKS.contains(&segment) {
                bail!("unknown network segment {segment}");
            }
            segments.insert(segment.to_string());
        }

        let mut resources = Vec::new();
        let mut networks: HashMap<String, (String, String)> = HashMap::new();
        for segment in &segments {
            let network_name = format!("range_{}_{}", job.range_id, segment);
            let network_id = self
                .ensure_network(job, template_id, segment, &network_name)
                .await
                .with_context(|| format!("ensure network {segment}"))?;
            self.emit(
                job,
                EventLevel::Info,
                "provision.network",
                "network ready",
                serde_json::json!({
                    "network_id": network_id,
                    "name": network_name,
                    "segment": segment,
                }),
            )
            .await;
            resources.push(NewResource::network(&network_id, segment, &network_name));
            networks.insert(segment.clone(), (network_id, network_name));
        }

        let mut ports_meta: BTreeMap<String, PortMap> = BTreeMap::new();
        for service in &definition.services {
            let segment = normalize_network(&service.network).to_string();
            self.ensure_image(&service.image).await?;
            self.emit(
                job,
                EventLevel::Info,
                "provision.image",
                &format!("image ready {}", service.image),
                serde_json::json!({ "service_name": service.name }),
            )
            .await;

            let room = match overrides.get(&service.name) {
                Some(over) => definition.room.overlaid(over),
                None => definition.room.clone(),
            };
            let (network_id, network_name) = networks
                .get(&segment)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("network for segment {segment} not ensured"))?;
            let spec = container_spec(job, template_id, &room, service, network_id, network_name);

            let container_name = format!("range_{}_{}", job.range_id, service.name);
            let (container_id, created) = self
                .ensure_container(job, template_id, &service.name, &container_name, &spec)
                .await
                .with_context(|| format!("ensure container {}", service.name))?;
            let (kind, message) = if created {
                ("provision.service.create", format!("created service {}", service.name))
            } else {
                ("provision.service.reuse", format!("reused service {}", service.name))
            };
            self.emit(
                job,
                EventLevel::Info,
                kind,
                &message,
                serde_json::json!({ "docker_id": container_id }),
            )
            .await;

            self.runtime
                .start_container(&container_id)
                .await
                .with_context(|| format!("start service {}", service.name))?;
            self.wait_healthy(&container_id, &service.healthcheck)
                .await?;

            if let Ok(status) = self.runtime.inspect_container(&container_id).await {
                ports_meta.insert(service.name.clone(), status.ports);
            }
            resources.push(NewResource::container(
                &container_id,
                &service.name,
                &segment,
                &service.image,
            ));
            self.emit(
                job,
                EventLevel::Info,
                "provision.service",
                &format!("started service {}", service.name),
                serde_json::json!({ "docker_id": container_id }),
            )
            .await;
            self.emit(
                job,
                EventLevel::Info,
                "provision.health",
                &format!("healthy service {}", service.name),
                serde_json::json!({}),
            )
            .await;
        }

        let metadata = serde_json::json!({ "ports": ports_meta });
        self.store
            .replace_resources(job.range_id, &resources)
            .await?;
        self.store
            .update_range_status(job.range_id, RangeStatus::Ready, Some(&metadata))
            .await?;
        self.emit(
            job,
            EventLevel::Info,
            "provision.done",
            "range ready",
            serde_json::json!({ "ports": ports_meta }),
        )
        .await;
        Ok(())
    }

    async fn destroy(&self, job: &ClaimedJob) -> Result<()> {
        self.emit(
            job,
            EventLevel::Info,
            "destroy.start",
            "destroy started",
            serde_json::json!({}),
        )
        .await;
        self.store
            .update_range_status(job.range_id, RangeStatus::Destroying, None)
            .await?;

        // Remove everything carrying the range label, whatever team or
        // template it claims; per-resource failures are skipped so a
        // half-dead range can still be torn down.
        let range_filter = vec![format!("range_id={}", job.range_id)];
        for container_id in self.runtime.list_containers(&range_filter).await? {
            if self.runtime.remove_container(&container_id).await.is_ok() {
                self.emit(
                    job,
                    EventLevel::Info,
                    "destroy.container",
                    "removed container",
                    serde_json::json!({ "docker_id": container_id }),
                )
                .await;
            }
        }
        for network_id in self.runtime.list_networks(&range_filter).await? {
            if self.runtime.remove_network(&network_id).await.is_ok() {
                self.emit(
                    job,
                    EventLevel::Info,
                    "destroy.network",
                    "removed network",
                    serde_json::json!({ "docker_id": network_id }),
                )
                .await;
            }
        }

        self.store.replace_resources(job.range_id, &[]).await?;
        let metadata = serde_json::json!({ "ports": {} });
        self.store
            .update_range_status(job.range_id, RangeStatus::Destroyed, Some(&metadata))
            .await?;
        self.emit(
            job,
            EventLevel::Info,
            "destroy.done",
            "range destroyed",
            serde_json::json!({}),
        )
        .await;
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        // Locally built images have nothing to pull; only fetch when the
        // daemon does not already know the reference.
        if self.runtime.image_present(image).await? {
            return Ok(());
        }
        self.runtime
            .pull_image(image)
            .await
            .with_context(|| format!("pull image {image}"))
    }

    async fn ensure_network(
        &self,
        job: &ClaimedJob,
        template_id: i64,
        segment: &str,
        name: &str,
    ) -> Result<String> {
        let labels = ResourceLabels {
            range_id: job.range_id,
            team_id: job.team_id,
            template_id,
            service_name: format!("network-{segment}"),
        };
        let existing = self.runtime.list_networks(&labels.to_filters()).await?;
        if let Some(id) = existing.into_iter().next() {
            return Ok(id);
        }
        let mut label_map = labels.to_map();
        label_map.insert("network_segment".to_string(), segment.to_string());
        self.runtime.create_network(name, &label_map).await
    }

    async fn ensure_container(
        &self,
        job: &ClaimedJob,
        template_id: i64,
        service_name: &str,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<(String, bool)> {
        let labels = ResourceLabels {
            range_id: job.range_id,
            team_id: job.team_id,
            template_id,
            service_name: service_name.to_string(),
        };
        let existing = self.runtime.list_containers(&labels.to_filters()).await?;
        // First match wins; duplicates only arise from manual intervention.
        if let Some(id) = existing.into_iter().next() {
            return Ok((id, false));
        }
        let id = self.runtime.create_container(name, spec).await?;
        Ok((id, true))
    }

    /// Poll until the service is healthy. An explicit healthcheck command
    /// takes precedence; otherwise the daemon's own health status decides,
    /// falling back to plain `Running` for containers with no check at all.
    async fn wait_healthy(&self, container_id: &str, healthcheck: &str) -> Result<()> {
        let probe = async {
            let mut ticker = tokio::time::interval(HEALTH_POLL);
            // The first tick fires immediately; consume it so checks start
            // one poll period after container start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !healthcheck.is_empty() {
                    match self.runtime.exec_status(container_id, healthcheck).await {
                        Ok(Some(0)) => return Ok(()),
                        Ok(_) | Err(_) => continue,
                    }
                }
                let status = match self.runtime.inspect_container(container_id).await {
                    Ok(status) => status,
                    Err(_) => continue,
                };
                match status.health {
                    Some(HealthStatus::Healthy) => return Ok(()),
                    Some(HealthStatus::Unhealthy) => bail!("container unhealthy"),
                    Some(HealthStatus::Starting) => continue,
                    None => {
                        if status.running {
                            return Ok(());
                        }
                    }
                }
            }
        };
        match tokio::time::timeout(HEALTH_TIMEOUT, probe).await {
            Ok(result) => result,
            Err(_) => bail!("health check timeout"),
        }
    }

    async fn emit(
        &self,
        job: &ClaimedJob,
        level: EventLevel,
        kind: &str,
        message: &str,
        payload: serde_json::Value,
    ) {
        if let Err(err) = self
            .store
            .insert_event(job.range_id, Some(job.id), level, kind, message, payload)
            .await
        {
            warn!(range_id = job.range_id, kind, error = %err, "event write failed");
        }
    }
}

fn container_spec(
    job: &ClaimedJob,
    template_id: i64,
    effective_room: &RoomOptions,
    service: &Service,
    network_id: String,
    network_name: String,
) -> ContainerSpec {
    let ports = service
        .exposed_ports
        .iter()
        .map(|port| PortSpec {
            container: port.container,
            host: port.host,
            protocol: port.normalized_protocol().to_string(),
        })
        .collect();
    let labels = ResourceLabels {
        range_id: job.range_id,
        team_id: job.team_id,
        template_id,
        service_name: service.name.clone(),
    };
    ContainerSpec {
        image: service.image.clone(),
        command: service.command.clone(),
        env: build_service_env(effective_room, service),
        ports,
        labels: labels.to_map(),
        network_id,
        network_name,
    }
}

/// True when shutdown fired during the sleep.
async fn sleep_or_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
