//! Observability infrastructure for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (request/error counters, scaling state, container usage)
//! - Structured JSON logging with tracing

use crate::models::{AggregatedReading, ScalingStrategy};
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AppMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AppMetricsInner {
    requests_total: IntCounter,
    errors_total: IntCounter,
    events_shed_total: IntCounter,
    dispatch_latency_seconds: Histogram,
    network_sent_bytes: IntGauge,
    network_received_bytes: IntGauge,
    container_cpu_percent: GaugeVec,
    container_memory_percent: GaugeVec,
    telemetry_errors_total: IntCounter,
    replicas: IntGauge,
    cpu_quota: Gauge,
    scaling_actions_total: IntCounterVec,
    scaling_rejected_total: IntCounter,
    scaling_failures_total: IntCounter,
}

impl AppMetricsInner {
    fn new() -> Self {
        Self {
            requests_total: register_int_counter!(
                "autoscaler_requests_total",
                "Total events successfully dispatched to a prediction service"
            )
            .expect("Failed to register requests_total"),

            errors_total: register_int_counter!(
                "autoscaler_errors_total",
                "Total events that failed to parse, route or dispatch"
            )
            .expect("Failed to register errors_total"),

            events_shed_total: register_int_counter!(
                "autoscaler_events_shed_total",
                "Image events owned by another replica and not dispatched"
            )
            .expect("Failed to register events_shed_total"),

            dispatch_latency_seconds: register_histogram!(
                "autoscaler_dispatch_latency_seconds",
                "Time spent waiting for prediction services",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register dispatch_latency_seconds"),

            network_sent_bytes: register_int_gauge!(
                "autoscaler_network_sent_bytes",
                "Total network bytes sent by the host"
            )
            .expect("Failed to register network_sent_bytes"),

            network_received_bytes: register_int_gauge!(
                "autoscaler_network_received_bytes",
                "Total network bytes received by the host"
            )
            .expect("Failed to register network_received_bytes"),

            container_cpu_percent: register_gauge_vec!(
                "autoscaler_container_cpu_percent",
                "Windowed mean CPU usage of a monitored container",
                &["container_name"]
            )
            .expect("Failed to register container_cpu_percent"),

            container_memory_percent: register_gauge_vec!(
                "autoscaler_container_memory_percent",
                "Windowed mean memory usage of a monitored container",
                &["container_name"]
            )
            .expect("Failed to register container_memory_percent"),

            telemetry_errors_total: register_int_counter!(
                "autoscaler_telemetry_errors_total",
                "Total failed container stats fetches"
            )
            .expect("Failed to register telemetry_errors_total"),

            replicas: register_int_gauge!(
                "autoscaler_replicas",
                "Current logical replica count of the scaled service"
            )
            .expect("Failed to register replicas"),

            cpu_quota: register_gauge!(
                "autoscaler_cpu_quota",
                "Current CPU quota of the scaled service"
            )
            .expect("Failed to register cpu_quota"),

            scaling_actions_total: register_int_counter_vec!(
                "autoscaler_scaling_actions_total",
                "Completed scaling actions",
                &["strategy", "direction"]
            )
            .expect("Failed to register scaling_actions_total"),

            scaling_rejected_total: register_int_counter!(
                "autoscaler_scaling_rejected_total",
                "Scaling requests rejected because another one was in flight"
            )
            .expect("Failed to register scaling_rejected_total"),

            scaling_failures_total: register_int_counter!(
                "autoscaler_scaling_failures_total",
                "Scaling requests that failed at the container runtime"
            )
            .expect("Failed to register scaling_failures_total"),
        }
    }
}

/// Application metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AppMetrics {
    _private: (),
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AppMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppMetrics").finish()
    }
}

impl AppMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AppMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AppMetricsInner {
        GLOBAL_METRICS.get_or_init(AppMetricsInner::new)
    }

    pub fn inc_requests(&self) {
        self.inner().requests_total.inc();
    }

    pub fn inc_errors(&self) {
        self.inner().errors_total.inc();
    }

    pub fn inc_events_shed(&self) {
        self.inner().events_shed_total.inc();
    }

    pub fn observe_dispatch_latency(&self, duration_secs: f64) {
        self.inner().dispatch_latency_seconds.observe(duration_secs);
    }

    /// Update host network counters
    pub fn set_network_bytes(&self, sent: u64, received: u64) {
        self.inner().network_sent_bytes.set(sent as i64);
        self.inner().network_received_bytes.set(received as i64);
    }

    /// Mirror an aggregated reading into the scrape registry
    pub fn set_container_usage(&self, reading: &AggregatedReading) {
        self.inner()
            .container_cpu_percent
            .with_label_values(&[reading.label.as_str()])
            .set(reading.cpu_percent);
        self.inner()
            .container_memory_percent
            .with_label_values(&[reading.label.as_str()])
            .set(reading.memory_percent);
    }

    pub fn inc_telemetry_errors(&self) {
        self.inner().telemetry_errors_total.inc();
    }

    /// Update the exported capacity of the scaled service
    pub fn set_capacity(&self, replicas: u32, cpu_quota: f64) {
        self.inner().replicas.set(i64::from(replicas));
        self.inner().cpu_quota.set(cpu_quota);
    }

    pub fn inc_scaling_action(&self, strategy: ScalingStrategy, direction: &str) {
        let strategy = strategy.to_string();
        self.inner()
            .scaling_actions_total
            .with_label_values(&[strategy.as_str(), direction])
            .inc();
    }

    pub fn inc_scaling_rejected(&self) {
        self.inner().scaling_rejected_total.inc();
    }

    pub fn inc_scaling_failures(&self) {
        self.inner().scaling_failures_total.inc();
    }

    /// Current value of the dispatched request counter
    pub fn requests(&self) -> u64 {
        self.inner().requests_total.get()
    }

    /// Current value of the error counter
    pub fn errors(&self) -> u64 {
        self.inner().errors_total.get()
    }
}

/// Structured logger for autoscaler events
///
/// Provides consistent JSON-formatted logging for scaling decisions,
/// telemetry windows and lifecycle events.
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_startup(&self, version: &str, strategy: ScalingStrategy) {
        info!(
            event = "autoscaler_started",
            service = %self.service,
            version = %version,
            strategy = %strategy,
            "Autoscaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autoscaler_shutdown",
            service = %self.service,
            reason = %reason,
            "Autoscaler shutting down"
        );
    }

    /// Log the evaluation of one telemetry window
    pub fn log_window(&self, reading: &AggregatedReading, decision: &str) {
        info!(
            event = "window_evaluated",
            service = %self.service,
            window = reading.window,
            cpu_percent = reading.cpu_percent,
            memory_percent = reading.memory_percent,
            samples = reading.samples,
            decision = %decision,
            "Considering CPU usage of scaled service"
        );
    }

    pub fn log_scaling_started(&self, strategy: ScalingStrategy, from: f64, to: f64) {
        info!(
            event = "scaling_started",
            service = %self.service,
            strategy = %strategy,
            from = from,
            to = to,
            "Scaling operation started"
        );
    }

    pub fn log_scaling_completed(&self, strategy: ScalingStrategy, from: f64, to: f64) {
        info!(
            event = "scaling_completed",
            service = %self.service,
            strategy = %strategy,
            from = from,
            to = to,
            "Scaling operation complete"
        );
    }

    pub fn log_scaling_rejected(&self, strategy: ScalingStrategy) {
        info!(
            event = "scaling_rejected",
            service = %self.service,
            strategy = %strategy,
            "Scaling operation already in progress, skipping"
        );
    }

    pub fn log_scaling_failed(&self, strategy: ScalingStrategy, error: &str) {
        warn!(
            event = "scaling_failed",
            service = %self.service,
            strategy = %strategy,
            error = %error,
            "Scaling operation failed, state unchanged"
        );
    }

    pub fn log_event_shed(&self, key: &str, partition: u32, replicas: u32) {
        debug!(
            event = "event_shed",
            service = %self.service,
            routing_key = %key,
            partition = partition,
            replicas = replicas,
            "Skipped image event owned by another replica"
        );
    }
}
