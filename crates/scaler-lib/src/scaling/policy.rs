//! Threshold policy for the scaled service
//!
//! Two thresholds give the hysteresis band: at or above `upper_threshold`
//! capacity grows by one step, below `lower_threshold` it shrinks by one
//! step, anything in between leaves it alone. Decisions are always clamped
//! to the configured bounds.

use crate::models::ScalingStrategy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default CPU percentage at which capacity is added
pub const DEFAULT_UPPER_THRESHOLD: f64 = 80.0;

/// Default CPU percentage below which capacity is removed
pub const DEFAULT_LOWER_THRESHOLD: f64 = 35.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub upper_threshold: f64,
    pub lower_threshold: f64,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub replica_step: u32,
    pub min_cpu_quota: f64,
    pub max_cpu_quota: f64,
    pub cpu_quota_step: f64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            upper_threshold: DEFAULT_UPPER_THRESHOLD,
            lower_threshold: DEFAULT_LOWER_THRESHOLD,
            min_replicas: 1,
            max_replicas: 3,
            replica_step: 1,
            min_cpu_quota: 1.0,
            max_cpu_quota: 3.0,
            cpu_quota_step: 1.0,
        }
    }
}

/// Outcome of evaluating one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScalingDecision {
    NoChange,
    Replicas { from: u32, to: u32 },
    CpuQuota { from: f64, to: f64 },
}

impl ScalingDecision {
    /// "up", "down" or "none"
    pub fn direction(&self) -> &'static str {
        match *self {
            ScalingDecision::Replicas { from, to } if to > from => "up",
            ScalingDecision::Replicas { from, to } if to < from => "down",
            ScalingDecision::CpuQuota { from, to } if to > from => "up",
            ScalingDecision::CpuQuota { from, to } if to < from => "down",
            _ => "none",
        }
    }

    pub fn is_change(&self) -> bool {
        self.direction() != "none"
    }
}

impl fmt::Display for ScalingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingDecision::NoChange => f.write_str("no-op"),
            ScalingDecision::Replicas { from, to } => write!(f, "replicas {} -> {}", from, to),
            ScalingDecision::CpuQuota { from, to } => write!(f, "cpus {} -> {}", from, to),
        }
    }
}

impl ScalingPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.lower_threshold < self.upper_threshold) {
            anyhow::bail!(
                "lower threshold {} must be below upper threshold {}",
                self.lower_threshold,
                self.upper_threshold
            );
        }
        if self.min_replicas == 0 || self.min_replicas > self.max_replicas {
            anyhow::bail!(
                "invalid replica bounds [{}, {}]",
                self.min_replicas,
                self.max_replicas
            );
        }
        if !(self.min_cpu_quota >= 1.0 && self.min_cpu_quota <= self.max_cpu_quota) {
            anyhow::bail!(
                "invalid cpu quota bounds [{}, {}]",
                self.min_cpu_quota,
                self.max_cpu_quota
            );
        }
        if self.replica_step == 0 || !(self.cpu_quota_step > 0.0) {
            anyhow::bail!("scaling steps must be positive");
        }
        Ok(())
    }

    pub fn clamp_replicas(&self, replicas: u32) -> u32 {
        replicas.clamp(self.min_replicas, self.max_replicas)
    }

    pub fn clamp_cpu_quota(&self, cpu_quota: f64) -> f64 {
        cpu_quota.clamp(self.min_cpu_quota, self.max_cpu_quota)
    }

    /// Pick exactly one action for a windowed CPU reading
    pub fn decide(
        &self,
        cpu_percent: f64,
        strategy: ScalingStrategy,
        replicas: u32,
        cpu_quota: f64,
    ) -> ScalingDecision {
        let grow = cpu_percent >= self.upper_threshold;
        let shrink = cpu_percent < self.lower_threshold;
        if !grow && !shrink {
            return ScalingDecision::NoChange;
        }

        match strategy {
            ScalingStrategy::Horizontal => {
                let to = if grow {
                    self.clamp_replicas(replicas.saturating_add(self.replica_step))
                } else {
                    self.clamp_replicas(replicas.saturating_sub(self.replica_step))
                };
                if to == replicas {
                    ScalingDecision::NoChange
                } else {
                    ScalingDecision::Replicas { from: replicas, to }
                }
            }
            ScalingStrategy::Vertical => {
                let to = if grow {
                    self.clamp_cpu_quota(cpu_quota + self.cpu_quota_step)
                } else {
                    self.clamp_cpu_quota(cpu_quota - self.cpu_quota_step)
                };
                if (to - cpu_quota).abs() < f64::EPSILON {
                    ScalingDecision::NoChange
                } else {
                    ScalingDecision::CpuQuota {
                        from: cpu_quota,
                        to,
                    }
                }
            }
        }
    }
}
