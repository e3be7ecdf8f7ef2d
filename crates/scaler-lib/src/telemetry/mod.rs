//! Container telemetry
//!
//! This module provides the sampling loop that turns raw container stats
//! into windowed readings, and the publishers that export those readings.

mod publisher;
mod sampler;


pub use publisher::{NoopPublisher, PushGatewayPublisher, DEFAULT_PUSH_JOB};
pub use sampler::{SamplerConfig, TelemetrySampler, TickResults};

use crate::models::AggregatedReading;
use anyhow::Result;
use async_trait::async_trait;

/// Sink for aggregated readings
#[async_trait]
pub trait MetricsPublisher: Send + Sync {
    /// Publish the readings of one window
    async fn publish(&self, readings: &[AggregatedReading]) -> Result<()>;
}
