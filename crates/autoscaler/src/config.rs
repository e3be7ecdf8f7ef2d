//! Autoscaler configuration

use anyhow::{Context, Result};
use scaler_lib::router::{Endpoints, EventSourceConfig};
use scaler_lib::runtime::MonitorRule;
use scaler_lib::scaling::{ScalingPolicy, DEFAULT_LOWER_THRESHOLD, DEFAULT_UPPER_THRESHOLD};
use scaler_lib::telemetry::{SamplerConfig, DEFAULT_PUSH_JOB};
use scaler_lib::ScalingStrategy;
use serde::Deserialize;
use std::time::Duration;

/// Autoscaler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// API server port for health, metrics, scaling and events
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Scaling strategy, fixed for the lifetime of the process
    #[serde(default = "default_strategy")]
    pub strategy: ScalingStrategy,

    /// Substring identifying the scaled container
    #[serde(default = "default_target_keyword")]
    pub target_keyword: String,

    /// Monitored containers as `keyword=Label` pairs separated by commas
    #[serde(default = "default_monitor")]
    pub monitor: String,

    #[serde(default = "default_upper_threshold")]
    pub upper_threshold: f64,

    #[serde(default = "default_lower_threshold")]
    pub lower_threshold: f64,

    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,

    #[serde(default = "default_max_cpu_quota")]
    pub max_cpu_quota: f64,

    /// Sampling interval in milliseconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Samples folded into one decision window
    #[serde(default = "default_window_ticks")]
    pub window_ticks: u64,

    /// Simulated horizontal provisioning delay in seconds
    #[serde(default = "default_provisioning_delay")]
    pub provisioning_delay_secs: u64,

    /// Timeout for container resource updates in seconds
    #[serde(default = "default_admin_timeout")]
    pub admin_timeout_secs: u64,

    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,

    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    #[serde(default = "default_mqtt_topic")]
    pub mqtt_topic: String,

    #[serde(default = "default_numeric_endpoint")]
    pub numeric_endpoint: String,

    #[serde(default = "default_classification_endpoint")]
    pub classification_endpoint: String,

    #[serde(default = "default_image_endpoint")]
    pub image_endpoint: String,

    /// Timeout for one prediction call in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Push gateway base URL; empty disables pushing
    #[serde(default = "default_pushgateway_url")]
    pub pushgateway_url: String,

    #[serde(default = "default_push_job")]
    pub push_job: String,
}

fn default_api_port() -> u16 {
    5000
}

fn default_strategy() -> ScalingStrategy {
    ScalingStrategy::Horizontal
}

fn default_target_keyword() -> String {
    "image_model".to_string()
}

fn default_monitor() -> String {
    "image=Image model".to_string()
}

fn default_upper_threshold() -> f64 {
    DEFAULT_UPPER_THRESHOLD
}

fn default_lower_threshold() -> f64 {
    DEFAULT_LOWER_THRESHOLD
}

fn default_max_replicas() -> u32 {
    3
}

fn default_max_cpu_quota() -> f64 {
    3.0
}

fn default_sample_interval() -> u64 {
    1000
}

fn default_window_ticks() -> u64 {
    5
}

fn default_provisioning_delay() -> u64 {
    15
}

fn default_admin_timeout() -> u64 {
    10
}

fn default_mqtt_host() -> String {
    "rabbitmq".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "data_influx".to_string()
}

fn default_numeric_endpoint() -> String {
    "http://linear_model:5001/predict".to_string()
}

fn default_classification_endpoint() -> String {
    "http://xgboost_model:5002/predict".to_string()
}

fn default_image_endpoint() -> String {
    "http://image_model:5003/predict".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_pushgateway_url() -> String {
    "http://pushgateway:9091".to_string()
}

fn default_push_job() -> String {
    DEFAULT_PUSH_JOB.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            strategy: default_strategy(),
            target_keyword: default_target_keyword(),
            monitor: default_monitor(),
            upper_threshold: default_upper_threshold(),
            lower_threshold: default_lower_threshold(),
            max_replicas: default_max_replicas(),
            max_cpu_quota: default_max_cpu_quota(),
            sample_interval_ms: default_sample_interval(),
            window_ticks: default_window_ticks(),
            provisioning_delay_secs: default_provisioning_delay(),
            admin_timeout_secs: default_admin_timeout(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_topic: default_mqtt_topic(),
            numeric_endpoint: default_numeric_endpoint(),
            classification_endpoint: default_classification_endpoint(),
            image_endpoint: default_image_endpoint(),
            request_timeout_secs: default_request_timeout(),
            pushgateway_url: default_pushgateway_url(),
            push_job: default_push_job(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional `autoscaler` file and the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("autoscaler").required(false))
            .add_source(config::Environment::with_prefix("SCALER"))
            .build()
            .context("Failed to read configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings before anything starts
    pub fn validate(&self) -> Result<()> {
        self.policy().validate()?;

        if self.sample_interval_ms == 0 {
            anyhow::bail!("sample_interval_ms must be greater than zero");
        }
        if self.window_ticks == 0 {
            anyhow::bail!("window_ticks must be greater than zero");
        }
        if self.target_keyword.trim().is_empty() {
            anyhow::bail!("target_keyword must not be empty");
        }
        self.monitor_rules()?;
        self.endpoints()?;
        if !self.pushgateway_url.is_empty() {
            url::Url::parse(&self.pushgateway_url).context("Invalid push gateway URL")?;
        }

        Ok(())
    }

    pub fn policy(&self) -> ScalingPolicy {
        ScalingPolicy {
            upper_threshold: self.upper_threshold,
            lower_threshold: self.lower_threshold,
            max_replicas: self.max_replicas,
            max_cpu_quota: self.max_cpu_quota,
            ..ScalingPolicy::default()
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            tick: Duration::from_millis(self.sample_interval_ms),
            window_ticks: self.window_ticks,
        }
    }

    pub fn monitor_rules(&self) -> Result<Vec<MonitorRule>> {
        self.monitor
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (keyword, label) = entry
                    .split_once('=')
                    .with_context(|| format!("Monitor entry '{}' is not keyword=Label", entry))?;
                Ok(MonitorRule::new(keyword.trim(), label.trim()))
            })
            .collect()
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::new(
            &self.numeric_endpoint,
            &self.classification_endpoint,
            &self.image_endpoint,
        )
    }

    pub fn event_source(&self) -> EventSourceConfig {
        EventSourceConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            topic: self.mqtt_topic.clone(),
            ..EventSourceConfig::default()
        }
    }

    pub fn provisioning_delay(&self) -> Duration {
        Duration::from_secs(self.provisioning_delay_secs)
    }

    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
