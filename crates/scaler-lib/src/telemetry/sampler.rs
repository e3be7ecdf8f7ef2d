//! Telemetry sampling loop
//!
//! Polls every monitored container once per tick, keeps the readings in a
//! per-container buffer and folds the buffer into one aggregated reading
//! every `window_ticks` ticks.

use super::MetricsPublisher;
use crate::health::{components, HealthRegistry};
use crate::models::{AggregatedReading, CpuSample, MonitoredContainer, ServiceTarget};
use crate::observability::AppMetrics;
use crate::runtime::StatsSource;
use crate::scaling::ScalingState;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between two samples (default: 1 second)
    pub tick: Duration,
    /// Number of ticks folded into one reading (default: 5)
    pub window_ticks: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            window_ticks: 5,
        }
    }
}

/// Results of one tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickResults {
    pub success_count: usize,
    pub error_count: usize,
    /// Number of aggregated readings produced on this tick
    pub readings: usize,
}

pub struct TelemetrySampler {
    source: Arc<dyn StatsSource>,
    containers: Vec<MonitoredContainer>,
    target: ServiceTarget,
    state: ScalingState,
    publisher: Arc<dyn MetricsPublisher>,
    health: HealthRegistry,
    config: SamplerConfig,
    metrics: AppMetrics,
    buffers: HashMap<String, Vec<CpuSample>>,
    readings_tx: watch::Sender<Option<AggregatedReading>>,
    tick_count: u64,
    window: u64,
}

impl TelemetrySampler {
    /// Create a sampler and the channel the decision engine reads from
    ///
    /// The target is always sampled, even if no monitor rule selected it.
    pub fn new(
        source: Arc<dyn StatsSource>,
        mut containers: Vec<MonitoredContainer>,
        target: ServiceTarget,
        state: ScalingState,
        publisher: Arc<dyn MetricsPublisher>,
        health: HealthRegistry,
        config: SamplerConfig,
    ) -> (Self, watch::Receiver<Option<AggregatedReading>>) {
        if !containers
            .iter()
            .any(|c| c.container_id == target.container_id)
        {
            containers.push(MonitoredContainer {
                container_id: target.container_id.clone(),
                name: target.name.clone(),
                label: target.name.clone(),
            });
        }

        let (readings_tx, readings_rx) = watch::channel(None);
        let sampler = Self {
            source,
            containers,
            target,
            state,
            publisher,
            health,
            config,
            metrics: AppMetrics::new(),
            buffers: HashMap::new(),
            readings_tx,
            tick_count: 0,
            window: 0,
        };

        (sampler, readings_rx)
    }

    /// Sample until shutdown; errors never stop the loop
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            tick_ms = self.config.tick.as_millis() as u64,
            window_ticks = self.config.window_ticks,
            containers = self.containers.len(),
            target = %self.target.name,
            "Starting telemetry sampler"
        );

        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let results = self.tick().await;
                    if results.readings > 0 {
                        debug!(
                            window = self.window,
                            containers = results.success_count,
                            errors = results.error_count,
                            "Telemetry window complete"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down telemetry sampler");
                    break;
                }
            }
        }
    }

    /// Sample all containers once and close the window when due
    pub async fn tick(&mut self) -> TickResults {
        let mut results = TickResults::default();
        let cpu_quota = self.state.cpu_quota();

        for container in &self.containers {
            match self.sample(container, cpu_quota).await {
                Ok(sample) => {
                    results.success_count += 1;
                    self.buffers
                        .entry(container.container_id.clone())
                        .or_default()
                        .push(sample);
                }
                Err(e) => {
                    results.error_count += 1;
                    self.metrics.inc_telemetry_errors();
                    warn!(
                        container = %container.name,
                        error = %e,
                        "Failed to fetch container stats, retrying next tick"
                    );
                }
            }
        }

        if results.error_count > 0 {
            self.health
                .set_degraded(
                    components::SAMPLER,
                    format!("{} stats fetches failed", results.error_count),
                )
                .await;
        } else {
            self.health.set_healthy(components::SAMPLER).await;
        }

        self.tick_count += 1;
        if self.tick_count % self.config.window_ticks.max(1) == 0 {
            results.readings = self.close_window().await;
        }

        results
    }

    async fn sample(&self, container: &MonitoredContainer, cpu_quota: f64) -> Result<CpuSample> {
        let stats = self.source.snapshot(&container.container_id).await?;
        Ok(CpuSample {
            container_id: container.container_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            cpu_percent: stats.cpu_percent(cpu_quota),
            memory_percent: stats.memory_percent(),
        })
    }

    /// Fold and clear every buffer, publish, and forward the target reading
    async fn close_window(&mut self) -> usize {
        self.window += 1;

        let mut readings = Vec::new();
        for container in &self.containers {
            let samples = self
                .buffers
                .remove(&container.container_id)
                .unwrap_or_default();
            if let Some(reading) = AggregatedReading::from_samples(container, self.window, &samples)
            {
                readings.push(reading);
            }
        }

        if readings.is_empty() {
            debug!(window = self.window, "No samples collected in window");
            return 0;
        }

        for reading in &readings {
            self.metrics.set_container_usage(reading);
        }
        if let Err(e) = self.publisher.publish(&readings).await {
            warn!(error = %e, "Failed to publish container metrics");
        }

        if let Some(target) = readings
            .iter()
            .find(|r| r.container_id == self.target.container_id)
        {
            // send_replace keeps working when the engine is not running
            self.readings_tx.send_replace(Some(target.clone()));
        }

        readings.len()
    }
}
