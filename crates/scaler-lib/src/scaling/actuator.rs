//! Scaling actuators
//!
//! Both strategies claim the single scaling slot before doing anything, so
//! a request that arrives while another operation is in flight is rejected
//! immediately with `ScaleOutcome::InProgress` instead of waiting.

use super::policy::{ScalingDecision, ScalingPolicy};
use super::state::ScalingState;
use crate::models::{ScalingStrategy, ServiceTarget};
use crate::observability::{AppMetrics, StructuredLogger};
use crate::runtime::ContainerAdmin;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Simulated orchestrator latency for bringing a replica set to size
pub const DEFAULT_PROVISIONING_DELAY: Duration = Duration::from_secs(15);

/// Upper bound for a container runtime update call
pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScaleOutcome {
    Applied { decision: ScalingDecision },
    /// Another operation holds the slot; the request was dropped
    InProgress,
    /// The requested capacity is already in place
    Unchanged,
}

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("{requested} scaling requested but the {active} strategy is active")]
    StrategyMismatch {
        requested: ScalingStrategy,
        active: ScalingStrategy,
    },

    #[error("invalid scaling request: {0}")]
    InvalidRequest(String),

    #[error("container runtime rejected the update: {0}")]
    Runtime(String),

    #[error("container runtime did not answer within {0:?}")]
    Timeout(Duration),
}

/// A capacity change strategy
#[async_trait]
pub trait Actuator: Send + Sync {
    fn strategy(&self) -> ScalingStrategy;

    /// Carry out a decision and wait for it to complete
    async fn apply(&self, decision: ScalingDecision) -> Result<ScaleOutcome, ScaleError>;
}

/// Changes the logical replica count after a provisioning delay
pub struct HorizontalActuator {
    state: ScalingState,
    policy: ScalingPolicy,
    provisioning_delay: Duration,
    logger: StructuredLogger,
    metrics: AppMetrics,
}

impl HorizontalActuator {
    pub fn new(state: ScalingState, policy: ScalingPolicy, logger: StructuredLogger) -> Self {
        Self {
            state,
            policy,
            provisioning_delay: DEFAULT_PROVISIONING_DELAY,
            logger,
            metrics: AppMetrics::new(),
        }
    }

    pub fn with_provisioning_delay(mut self, delay: Duration) -> Self {
        self.provisioning_delay = delay;
        self
    }

    /// Bring the replica set to `replicas`, clamped to the policy bounds
    pub async fn scale_to(&self, replicas: u32) -> Result<ScaleOutcome, ScaleError> {
        let target = self.policy.clamp_replicas(replicas);

        let Some(in_flight) = self.state.try_begin() else {
            self.logger.log_scaling_rejected(ScalingStrategy::Horizontal);
            self.metrics.inc_scaling_rejected();
            return Ok(ScaleOutcome::InProgress);
        };

        let from = self.state.replicas();
        if from == target {
            return Ok(ScaleOutcome::Unchanged);
        }

        self.logger.log_scaling_started(
            ScalingStrategy::Horizontal,
            f64::from(from),
            f64::from(target),
        );

        // Dropping this future here releases the slot through the guard
        tokio::time::sleep(self.provisioning_delay).await;
        in_flight.commit_replicas(target);

        let decision = ScalingDecision::Replicas { from, to: target };
        self.metrics
            .inc_scaling_action(ScalingStrategy::Horizontal, decision.direction());
        self.metrics.set_capacity(target, self.state.cpu_quota());
        self.logger.log_scaling_completed(
            ScalingStrategy::Horizontal,
            f64::from(from),
            f64::from(target),
        );

        Ok(ScaleOutcome::Applied { decision })
    }
}

#[async_trait]
impl Actuator for HorizontalActuator {
    fn strategy(&self) -> ScalingStrategy {
        ScalingStrategy::Horizontal
    }

    async fn apply(&self, decision: ScalingDecision) -> Result<ScaleOutcome, ScaleError> {
        match decision {
            ScalingDecision::NoChange => Ok(ScaleOutcome::Unchanged),
            ScalingDecision::Replicas { to, .. } => self.scale_to(to).await,
            ScalingDecision::CpuQuota { .. } => Err(ScaleError::StrategyMismatch {
                requested: ScalingStrategy::Vertical,
                active: ScalingStrategy::Horizontal,
            }),
        }
    }
}

/// Changes the CPU quota of the running container
pub struct VerticalActuator {
    state: ScalingState,
    policy: ScalingPolicy,
    admin: Arc<dyn ContainerAdmin>,
    target: ServiceTarget,
    admin_timeout: Duration,
    logger: StructuredLogger,
    metrics: AppMetrics,
}

impl VerticalActuator {
    pub fn new(
        state: ScalingState,
        policy: ScalingPolicy,
        admin: Arc<dyn ContainerAdmin>,
        target: ServiceTarget,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            state,
            policy,
            admin,
            target,
            admin_timeout: DEFAULT_ADMIN_TIMEOUT,
            logger,
            metrics: AppMetrics::new(),
        }
    }

    pub fn with_admin_timeout(mut self, timeout: Duration) -> Self {
        self.admin_timeout = timeout;
        self
    }

    /// Set the container CPU quota to `cpus`, clamped to the policy bounds
    pub async fn scale_to(&self, cpus: f64) -> Result<ScaleOutcome, ScaleError> {
        if !cpus.is_finite() {
            return Err(ScaleError::InvalidRequest(format!("cpus must be finite, got {}", cpus)));
        }
        let target = self.policy.clamp_cpu_quota(cpus);

        let Some(in_flight) = self.state.try_begin() else {
            self.logger.log_scaling_rejected(ScalingStrategy::Vertical);
            self.metrics.inc_scaling_rejected();
            return Ok(ScaleOutcome::InProgress);
        };

        let from = self.state.cpu_quota();
        if (from - target).abs() < f64::EPSILON {
            return Ok(ScaleOutcome::Unchanged);
        }

        self.logger
            .log_scaling_started(ScalingStrategy::Vertical, from, target);

        let update = self.admin.set_cpu_quota(&self.target.container_id, target);
        let error = match tokio::time::timeout(self.admin_timeout, update).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ScaleError::Runtime(format!("{:#}", e))),
            Err(_) => Some(ScaleError::Timeout(self.admin_timeout)),
        };

        if let Some(error) = error {
            // Guard drops here, state keeps the previous quota
            self.metrics.inc_scaling_failures();
            self.logger
                .log_scaling_failed(ScalingStrategy::Vertical, &error.to_string());
            return Err(error);
        }

        in_flight.commit_cpu_quota(target);

        let decision = ScalingDecision::CpuQuota { from, to: target };
        self.metrics
            .inc_scaling_action(ScalingStrategy::Vertical, decision.direction());
        self.metrics.set_capacity(self.state.replicas(), target);
        self.logger
            .log_scaling_completed(ScalingStrategy::Vertical, from, target);

        Ok(ScaleOutcome::Applied { decision })
    }
}

#[async_trait]
impl Actuator for VerticalActuator {
    fn strategy(&self) -> ScalingStrategy {
        ScalingStrategy::Vertical
    }

    async fn apply(&self, decision: ScalingDecision) -> Result<ScaleOutcome, ScaleError> {
        match decision {
            ScalingDecision::NoChange => Ok(ScaleOutcome::Unchanged),
            ScalingDecision::CpuQuota { to, .. } => self.scale_to(to).await,
            ScalingDecision::Replicas { .. } => Err(ScaleError::StrategyMismatch {
                requested: ScalingStrategy::Horizontal,
                active: ScalingStrategy::Vertical,
            }),
        }
    }
}
