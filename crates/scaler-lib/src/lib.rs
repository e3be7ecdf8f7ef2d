//! Adaptive capacity control for containerized inference services
//!
//! This crate provides the core functionality for:
//! - Container telemetry sampling and windowed aggregation
//! - Threshold-based horizontal and vertical scaling
//! - Replica-aware routing of inbound prediction events
//! - Health checks and observability

pub mod health;
pub mod host;
pub mod models;
pub mod observability;
pub mod router;
pub mod runtime;
pub mod scaling;
pub mod telemetry;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AppMetrics, StructuredLogger};
