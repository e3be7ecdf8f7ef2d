//! Inbound event routing
//!
//! Events arrive on the MQTT stream or the HTTP API, pass the replica-aware
//! admission check and are forwarded to the prediction service for their kind.

mod balancer;
mod dispatcher;
mod source;

#[cfg(test)]
mod tests;

pub use balancer::{parse_event, partition, LoadRouter, RouteOutcome, RouterStats};
pub use dispatcher::{
    DispatchError, Dispatcher, Endpoints, ErrorResponse, HttpDispatcher, DEFAULT_REQUEST_TIMEOUT,
};
pub use source::{EventSourceConfig, MqttEventSource};
