//! Host network counters
//!
//! Reads `/proc/net/dev` once per second and mirrors the total bytes sent
//! and received over non-loopback interfaces into the process gauges.

use crate::observability::AppMetrics;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

/// Bytes moved over all non-loopback interfaces
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTotals {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

pub struct NetworkMonitor {
    net_dev_path: PathBuf,
    interval: Duration,
    metrics: AppMetrics,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self::with_path("/proc/net/dev")
    }

    /// Create monitor with custom net/dev path (for testing)
    pub fn with_path(net_dev_path: impl Into<PathBuf>) -> Self {
        Self {
            net_dev_path: net_dev_path.into(),
            interval: Duration::from_secs(1),
            metrics: AppMetrics::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Parse `/proc/net/dev` contents
    ///
    /// The first two lines are headers. Receive bytes are the first column
    /// after the interface name, transmit bytes the ninth.
    pub fn parse_net_dev(content: &str) -> NetworkTotals {
        let mut totals = NetworkTotals::default();

        for line in content.lines().skip(2) {
            let Some((name, counters)) = line.split_once(':') else {
                continue;
            };
            if name.trim() == "lo" {
                continue;
            }

            let fields: Vec<u64> = counters
                .split_whitespace()
                .map(|f| f.parse().unwrap_or(0))
                .collect();
            if fields.len() < 9 {
                continue;
            }

            totals.bytes_received += fields[0];
            totals.bytes_sent += fields[8];
        }

        totals
    }

    pub async fn read(&self) -> Result<NetworkTotals> {
        let content = fs::read_to_string(&self.net_dev_path)
            .await
            .with_context(|| format!("Failed to read {}", self.net_dev_path.display()))?;
        Ok(Self::parse_net_dev(&content))
    }

    /// Refresh the gauges until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(path = %self.net_dev_path.display(), "Starting network monitor");
        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.read().await {
                        Ok(totals) => {
                            self.metrics.set_network_bytes(totals.bytes_sent, totals.bytes_received);
                        }
                        Err(e) => {
                            debug!(error = %e, "Skipping network counter refresh");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
