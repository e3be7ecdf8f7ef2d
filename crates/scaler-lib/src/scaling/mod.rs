//! Adaptive capacity control
//!
//! This module provides:
//! - Shared scaling state with a single-flight slot
//! - The dual-threshold policy
//! - Horizontal (replica count) and vertical (CPU quota) actuators
//! - The per-window decision loop

mod actuator;
mod engine;
mod policy;
mod state;

#[cfg(test)]
mod tests;

pub use actuator::{
    Actuator, HorizontalActuator, ScaleError, ScaleOutcome, VerticalActuator,
    DEFAULT_ADMIN_TIMEOUT, DEFAULT_PROVISIONING_DELAY,
};
pub use engine::{ScaleRequest, ScalingEngine, WindowOutcome};
pub use policy::{
    ScalingDecision, ScalingPolicy, DEFAULT_LOWER_THRESHOLD, DEFAULT_UPPER_THRESHOLD,
};
pub use state::{InFlight, ScalingSnapshot, ScalingState};
