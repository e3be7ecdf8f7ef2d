//! Scaling decision loop
//!
//! Consumes one aggregated reading per window, picks a single action from
//! the policy and waits for the actuator to finish before looking at the
//! next window.

use super::actuator::{Actuator, ScaleError, ScaleOutcome};
use super::policy::{ScalingDecision, ScalingPolicy};
use super::state::ScalingState;
use crate::models::{AggregatedReading, ScalingStrategy};
use crate::observability::StructuredLogger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// What happened to one evaluation window
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// The window was already evaluated
    Skipped,
    NoChange,
    Applied(ScalingDecision),
    /// Another scaling operation held the slot
    InProgress,
    Failed(String),
}

/// Manual capacity request, e.g. from the HTTP API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
}

pub struct ScalingEngine {
    policy: ScalingPolicy,
    state: ScalingState,
    actuator: Arc<dyn Actuator>,
    logger: StructuredLogger,
}

impl ScalingEngine {
    pub fn new(
        policy: ScalingPolicy,
        state: ScalingState,
        actuator: Arc<dyn Actuator>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            policy,
            state,
            actuator,
            logger,
        }
    }

    pub fn state(&self) -> &ScalingState {
        &self.state
    }

    /// Evaluate one window and carry out at most one action
    pub async fn evaluate(&self, reading: &AggregatedReading) -> WindowOutcome {
        if !self.state.begin_window(reading.window) {
            debug!(window = reading.window, "Window already evaluated, skipping");
            return WindowOutcome::Skipped;
        }

        let decision = self.policy.decide(
            reading.cpu_percent,
            self.state.strategy(),
            self.state.replicas(),
            self.state.cpu_quota(),
        );
        self.logger.log_window(reading, &decision.to_string());

        if !decision.is_change() {
            self.state.record_action(false);
            return WindowOutcome::NoChange;
        }

        let outcome = match self.actuator.apply(decision).await {
            Ok(ScaleOutcome::Applied { decision }) => WindowOutcome::Applied(decision),
            Ok(ScaleOutcome::Unchanged) => WindowOutcome::NoChange,
            Ok(ScaleOutcome::InProgress) => WindowOutcome::InProgress,
            Err(e) => WindowOutcome::Failed(e.to_string()),
        };

        self.state
            .record_action(matches!(outcome, WindowOutcome::Applied(_)));
        outcome
    }

    /// Route a manual request through the same actuator as the policy
    pub async fn request(&self, request: &ScaleRequest) -> Result<ScaleOutcome, ScaleError> {
        let strategy = self.state.strategy();
        let decision = match (strategy, request.replicas, request.cpus) {
            (ScalingStrategy::Horizontal, Some(replicas), None) => ScalingDecision::Replicas {
                from: self.state.replicas(),
                to: self.policy.clamp_replicas(replicas),
            },
            (ScalingStrategy::Vertical, None, Some(cpus)) if cpus.is_finite() => {
                ScalingDecision::CpuQuota {
                    from: self.state.cpu_quota(),
                    to: self.policy.clamp_cpu_quota(cpus),
                }
            }
            (ScalingStrategy::Horizontal, None, Some(_)) => {
                return Err(ScaleError::StrategyMismatch {
                    requested: ScalingStrategy::Vertical,
                    active: strategy,
                })
            }
            (ScalingStrategy::Vertical, Some(_), None) => {
                return Err(ScaleError::StrategyMismatch {
                    requested: ScalingStrategy::Horizontal,
                    active: strategy,
                })
            }
            _ => {
                return Err(ScaleError::InvalidRequest(
                    "expected exactly one of `replicas` or `cpus`".to_string(),
                ))
            }
        };

        info!(request = %decision, "Manual scaling requested");
        self.actuator.apply(decision).await
    }

    /// Evaluate readings until the channel closes or shutdown is signalled
    ///
    /// After an applied action any reading that arrived meanwhile is dropped;
    /// the next evaluation waits for a window closed after the commit.
    /// Shutdown also cancels an in-flight operation; the scaling slot is
    /// released and the capacity stays at its last committed value.
    pub async fn run(
        self: Arc<Self>,
        mut readings: watch::Receiver<Option<AggregatedReading>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            strategy = %self.state.strategy(),
            upper = self.policy.upper_threshold,
            lower = self.policy.lower_threshold,
            "Starting scaling engine"
        );

        loop {
            let reading = tokio::select! {
                changed = readings.changed() => {
                    if changed.is_err() {
                        warn!("Reading channel closed, stopping scaling engine");
                        break;
                    }
                    let latest = readings.borrow_and_update().clone();
                    latest
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scaling engine");
                    break;
                }
            };

            let Some(reading) = reading else {
                continue;
            };

            let outcome = tokio::select! {
                outcome = self.evaluate(&reading) => outcome,
                _ = shutdown.recv() => {
                    info!("Shutting down scaling engine, cancelling in-flight operation");
                    break;
                }
            };
            debug!(window = reading.window, outcome = ?outcome, "Window evaluated");

            if matches!(outcome, WindowOutcome::Applied(_)) {
                // Windows closed during provisioning were sampled at the old capacity
                let stale = readings.borrow_and_update().as_ref().map(|r| r.window);
                if let Some(window) = stale.filter(|w| *w != reading.window) {
                    debug!(window, "Discarding window sampled before the last commit");
                }
            }
        }
    }
}
