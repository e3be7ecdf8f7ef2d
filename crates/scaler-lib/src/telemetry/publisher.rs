//! Push-gateway publisher for aggregated container readings

use super::MetricsPublisher;
use crate::models::AggregatedReading;
use anyhow::{Context, Result};
use async_trait::async_trait;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Default push-gateway job name
pub const DEFAULT_PUSH_JOB: &str = "docker_metrics";

/// Pushes container gauges to a Prometheus push gateway
///
/// Gauges live in a dedicated registry so only container readings are
/// replaced on every push, not the process metrics.
pub struct PushGatewayPublisher {
    client: Client,
    push_url: Url,
    registry: Registry,
    cpu_usage: GaugeVec,
    memory_usage: GaugeVec,
}

impl PushGatewayPublisher {
    pub fn new(gateway: &str, job: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(gateway).context("Invalid push gateway URL")?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let push_url = base
            .join(&format!("metrics/job/{}", job))
            .context("Invalid push gateway job")?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let registry = Registry::new();
        let cpu_usage = GaugeVec::new(
            Opts::new("container_cpu_usage", "CPU usage of Docker container"),
            &["container_name"],
        )?;
        let memory_usage = GaugeVec::new(
            Opts::new("container_memory_usage", "Memory usage of Docker container"),
            &["container_name"],
        )?;
        registry.register(Box::new(cpu_usage.clone()))?;
        registry.register(Box::new(memory_usage.clone()))?;

        Ok(Self {
            client,
            push_url,
            registry,
            cpu_usage,
            memory_usage,
        })
    }

    pub fn push_url(&self) -> &Url {
        &self.push_url
    }

    /// Text exposition of the current gauges
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode container metrics")?;
        Ok(buffer)
    }
}

#[async_trait]
impl MetricsPublisher for PushGatewayPublisher {
    async fn publish(&self, readings: &[AggregatedReading]) -> Result<()> {
        for reading in readings {
            self.cpu_usage
                .with_label_values(&[reading.label.as_str()])
                .set(reading.cpu_percent);
            self.memory_usage
                .with_label_values(&[reading.label.as_str()])
                .set(reading.memory_percent);
        }

        let body = self.encode()?;
        let response = self
            .client
            .put(self.push_url.clone())
            .header("content-type", TextEncoder::new().format_type())
            .body(body)
            .send()
            .await
            .context("Failed to push metrics")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Push gateway error ({}): {}", status, body);
        }

        Ok(())
    }
}

/// Publisher used when no push gateway is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl MetricsPublisher for NoopPublisher {
    async fn publish(&self, _readings: &[AggregatedReading]) -> Result<()> {
        Ok(())
    }
}
