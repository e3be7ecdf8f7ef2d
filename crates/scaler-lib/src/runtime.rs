//! Container runtime access
//!
//! Telemetry and vertical scaling both talk to the container runtime's
//! administrative API. The traits keep the rest of the crate independent of
//! Docker so loops and actuators can be driven by in-memory fakes.

use crate::models::{ContainerInfo, ContainerStats, MonitoredContainer, ServiceTarget};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, StatsOptions, UpdateContainerOptions};
use bollard::Docker;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};

/// Source of per-container resource usage snapshots
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Fetch one non-streaming usage snapshot
    async fn snapshot(&self, container_id: &str) -> Result<ContainerStats>;

    /// List running containers
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>>;
}

/// Administrative interface used by the vertical actuator
#[async_trait]
pub trait ContainerAdmin: Send + Sync {
    /// Set the number of CPUs the container may use
    async fn set_cpu_quota(&self, container_id: &str, cpus: f64) -> Result<()>;
}

/// Docker engine client implementing both runtime traits
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Arc<Docker>,
}

impl DockerRuntime {
    /// Connect using the local defaults (unix socket or DOCKER_HOST)
    pub async fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker")?;
        docker.ping().await.context("Docker ping failed")?;
        info!("Connected to Docker engine");

        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

#[async_trait]
impl StatsSource for DockerRuntime {
    async fn snapshot(&self, container_id: &str) -> Result<ContainerStats> {
        // one_shot would skip the previous sample and leave no baseline
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = Box::pin(self.docker.stats(container_id, Some(options)));
        let stats = stream
            .next()
            .await
            .with_context(|| format!("No stats returned for container {}", container_id))?
            .with_context(|| format!("Failed to fetch stats for container {}", container_id))?;

        let cpu = &stats.cpu_stats;
        let precpu = &stats.precpu_stats;

        Ok(ContainerStats {
            cpu_total_usage: cpu.cpu_usage.total_usage,
            precpu_total_usage: precpu.cpu_usage.total_usage,
            system_cpu_usage: cpu.system_cpu_usage.unwrap_or(0),
            presystem_cpu_usage: precpu.system_cpu_usage.unwrap_or(0),
            online_cpus: cpu.online_cpus,
            percpu_count: cpu
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|per_cpu| per_cpu.len() as u64),
            memory_usage_bytes: stats.memory_stats.usage.unwrap_or(0),
            memory_limit_bytes: stats.memory_stats.limit.unwrap_or(0),
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let container_id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| container_id.clone());
                Some(ContainerInfo { container_id, name })
            })
            .collect())
    }
}

#[async_trait]
impl ContainerAdmin for DockerRuntime {
    async fn set_cpu_quota(&self, container_id: &str, cpus: f64) -> Result<()> {
        self.docker
            .update_container(container_id, update_options(cpus))
            .await
            .with_context(|| format!("Failed to update cpus of {} to {}", container_id, cpus))
    }
}

/// Update request limiting a container to `cpus` CPUs
pub(crate) fn update_options(cpus: f64) -> UpdateContainerOptions<String> {
    UpdateContainerOptions {
        nano_cp_us: Some((cpus * 1e9).round() as i64),
        ..Default::default()
    }
}

/// Keyword to label mapping used to select monitored containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRule {
    pub keyword: String,
    pub label: String,
}

impl MonitorRule {
    pub fn new(keyword: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            label: label.into(),
        }
    }
}

/// Containers selected at startup
#[derive(Debug, Clone)]
pub struct Discovery {
    pub monitored: Vec<MonitoredContainer>,
    pub target: Option<ServiceTarget>,
}

/// Select monitored containers and the scaled service from the running set
///
/// Matching is a case-insensitive substring test on the container name.
/// The first rule that matches provides the label.
pub async fn discover_targets(
    source: &dyn StatsSource,
    rules: &[MonitorRule],
    target_keyword: &str,
) -> Result<Discovery> {
    let containers = source.list_containers().await?;
    let target_keyword = target_keyword.to_lowercase();

    let mut monitored = Vec::new();
    let mut target = None;

    for container in containers {
        let name = container.name.to_lowercase();

        if let Some(rule) = rules
            .iter()
            .find(|rule| name.contains(&rule.keyword.to_lowercase()))
        {
            monitored.push(MonitoredContainer {
                container_id: container.container_id.clone(),
                name: container.name.clone(),
                label: rule.label.clone(),
            });
        }

        if target.is_none() && name.contains(&target_keyword) {
            target = Some(ServiceTarget {
                name: container.name.clone(),
                container_id: container.container_id.clone(),
            });
        }
    }

    match &target {
        Some(t) => info!(
            target = %t.name,
            monitored = monitored.len(),
            "Discovered scaled service"
        ),
        None => warn!(
            keyword = %target_keyword,
            monitored = monitored.len(),
            "Scaled service container not found"
        ),
    }

    Ok(Discovery { monitored, target })
}
