//! Core data models shared by the sampler, the scaling engine and the router

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capacity strategy used for the scaled service, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingStrategy {
    /// Change the logical replica count
    Horizontal,
    /// Change the CPU quota of the running container
    Vertical,
}

impl fmt::Display for ScalingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingStrategy::Horizontal => f.write_str("horizontal"),
            ScalingStrategy::Vertical => f.write_str("vertical"),
        }
    }
}

impl FromStr for ScalingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "horizontal" => Ok(ScalingStrategy::Horizontal),
            "vertical" => Ok(ScalingStrategy::Vertical),
            other => anyhow::bail!("unknown scaling strategy: {}", other),
        }
    }
}

/// The single service whose capacity is managed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub name: String,
    pub container_id: String,
}

/// A container whose resource usage is sampled and published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredContainer {
    pub container_id: String,
    pub name: String,
    /// Human readable label used for exported gauges
    pub label: String,
}

/// Container summary returned by the runtime listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub container_id: String,
    pub name: String,
}

/// Raw resource usage snapshot of one container
///
/// CPU counters are cumulative; `precpu_*` hold the runtime's previous sample
/// so a single non-streaming read is enough to derive a rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub online_cpus: Option<u64>,
    pub percpu_count: Option<u64>,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
}

impl ContainerStats {
    /// CPU usage normalised to the allotted quota, in percent
    pub fn cpu_percent(&self, cpu_quota: f64) -> f64 {
        let cpu_delta = self.cpu_total_usage.saturating_sub(self.precpu_total_usage);
        let system_delta = self.system_cpu_usage.saturating_sub(self.presystem_cpu_usage);
        if system_delta == 0 {
            return 0.0;
        }

        let cpus = self
            .online_cpus
            .or(self.percpu_count)
            .filter(|n| *n > 0)
            .unwrap_or(1) as f64;
        let quota = cpu_quota.max(1.0);

        (cpu_delta as f64 / system_delta as f64) * cpus * 100.0 / quota
    }

    /// Memory usage relative to the container limit, in percent
    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit_bytes == 0 {
            return 0.0;
        }
        self.memory_usage_bytes as f64 / self.memory_limit_bytes as f64 * 100.0
    }
}

/// A single point-in-time reading for one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    pub container_id: String,
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Mean usage over one sampling window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedReading {
    pub container_id: String,
    pub label: String,
    /// Sequence number of the window that produced this reading
    pub window: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub samples: usize,
    pub timestamp: i64,
}

impl AggregatedReading {
    /// Fold raw samples into one reading, `None` when there is nothing to fold
    pub fn from_samples(
        container: &MonitoredContainer,
        window: u64,
        samples: &[CpuSample],
    ) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let cpu_percent = samples.iter().map(|s| s.cpu_percent).sum::<f64>() / n;
        let memory_percent = samples.iter().map(|s| s.memory_percent).sum::<f64>() / n;
        let timestamp = samples.last().map(|s| s.timestamp).unwrap_or_default();

        Some(Self {
            container_id: container.container_id.clone(),
            label: container.label.clone(),
            window,
            cpu_percent,
            memory_percent,
            samples: samples.len(),
            timestamp,
        })
    }
}

/// Kind of inbound event, selecting the prediction service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Numeric,
    Classification,
    Image,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Numeric, EventKind::Classification, EventKind::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Numeric => "numeric",
            EventKind::Classification => "classification",
            EventKind::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record received from the inbound event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    Numeric { features: Vec<f64> },
    Classification { features: Vec<f64> },
    Image { image_path: String },
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Numeric { .. } => EventKind::Numeric,
            InboundEvent::Classification { .. } => EventKind::Classification,
            InboundEvent::Image { .. } => EventKind::Image,
        }
    }

    /// Key used to partition the event across replicas
    pub fn routing_key(&self) -> String {
        match self {
            InboundEvent::Numeric { features } | InboundEvent::Classification { features } => {
                features
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            }
            InboundEvent::Image { image_path } => image_path.clone(),
        }
    }

    /// JSON body expected by the prediction service
    pub fn payload(&self) -> serde_json::Value {
        match self {
            InboundEvent::Numeric { features } | InboundEvent::Classification { features } => {
                serde_json::json!({ "features": features })
            }
            InboundEvent::Image { image_path } => serde_json::json!({ "image_path": image_path }),
        }
    }
}
