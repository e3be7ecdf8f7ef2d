//! Replica-aware admission of inbound events
//!
//! Image events are partitioned over the current replica count and only the
//! share owned by replica 0 is served; the other kinds always go through.

use super::dispatcher::{DispatchError, Dispatcher};
use crate::health::{components, HealthRegistry};
use crate::models::{EventKind, InboundEvent};
use crate::observability::{AppMetrics, StructuredLogger};
use crate::scaling::ScalingState;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Replica that owns `key` out of `replicas`
///
/// Uses the first 8 bytes of the SHA-256 digest so the result is stable
/// across processes. A count of 0 is treated as 1.
pub fn partition(key: &str, replicas: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % u64::from(replicas.max(1))) as u32
}

/// Result of routing one event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RouteOutcome {
    /// Response of the prediction service
    Dispatched(serde_json::Value),
    /// Owned by another replica and dropped
    Shed { partition: u32, replicas: u32 },
}

/// Counts for events seen by one router
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub dispatched: u64,
    pub errors: u64,
    pub shed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    errors: AtomicU64,
    shed: AtomicU64,
}

pub struct LoadRouter {
    state: ScalingState,
    dispatcher: Arc<dyn Dispatcher>,
    logger: StructuredLogger,
    metrics: AppMetrics,
    counters: Counters,
    health: Option<HealthRegistry>,
}

impl LoadRouter {
    pub fn new(
        state: ScalingState,
        dispatcher: Arc<dyn Dispatcher>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            state,
            dispatcher,
            logger,
            metrics: AppMetrics::new(),
            counters: Counters::default(),
            health: None,
        }
    }

    /// Totals since this router was created
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            shed: self.counters.shed.load(Ordering::Relaxed),
        }
    }

    fn record_error(&self) {
        self.metrics.inc_errors();
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Report dispatch failures on the `router` component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Parse a raw stream record and route it
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<RouteOutcome, DispatchError> {
        let event = parse_event(payload).map_err(|e| {
            self.record_error();
            e
        })?;
        self.route(&event).await
    }

    /// Route one event
    pub async fn route(&self, event: &InboundEvent) -> Result<RouteOutcome, DispatchError> {
        if event.kind() == EventKind::Image {
            // Lock-free read, may lag an in-flight scale-out
            let replicas = self.state.replicas();
            let key = event.routing_key();
            let owner = partition(&key, replicas);
            if owner != 0 {
                self.metrics.inc_events_shed();
                self.counters.shed.fetch_add(1, Ordering::Relaxed);
                self.logger.log_event_shed(&key, owner, replicas);
                return Ok(RouteOutcome::Shed {
                    partition: owner,
                    replicas,
                });
            }
        }

        let started = Instant::now();
        let result = self.dispatcher.dispatch(event).await;
        self.metrics
            .observe_dispatch_latency(started.elapsed().as_secs_f64());

        match result {
            Ok(body) => {
                self.metrics.inc_requests();
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                if let Some(health) = &self.health {
                    health.set_healthy(components::ROUTER).await;
                }
                Ok(RouteOutcome::Dispatched(body))
            }
            Err(e) => {
                self.record_error();
                if let Some(health) = &self.health {
                    if matches!(e, DispatchError::Timeout(_) | DispatchError::Transport(_)) {
                        health
                            .set_degraded(components::ROUTER, e.to_string())
                            .await;
                    }
                }
                Err(e)
            }
        }
    }
}

/// Validate the `type` field before decoding the rest of the record
pub fn parse_event(payload: &[u8]) -> Result<InboundEvent, DispatchError> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| DispatchError::UnsupportedType("missing".to_string()))?;
    if EventKind::parse(kind).is_none() {
        return Err(DispatchError::UnsupportedType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| DispatchError::InvalidPayload(e.to_string()))
}
