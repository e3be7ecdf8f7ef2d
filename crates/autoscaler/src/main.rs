//! Inference autoscaler - adaptive capacity control for model containers
//!
//! This binary samples the scaled model container, scales it horizontally
//! or vertically on CPU thresholds and routes inbound prediction events.

use anyhow::{Context, Result};
use scaler_lib::{
    health::{components, HealthRegistry},
    host::NetworkMonitor,
    observability::{AppMetrics, StructuredLogger},
    router::{HttpDispatcher, LoadRouter, MqttEventSource},
    runtime::{discover_targets, ContainerAdmin, DockerRuntime, StatsSource},
    scaling::{Actuator, HorizontalActuator, ScalingEngine, ScalingState, VerticalActuator},
    telemetry::{MetricsPublisher, NoopPublisher, PushGatewayPublisher, TelemetrySampler},
    ScalingStrategy,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting inference-autoscaler");

    let config = config::AppConfig::load()?;
    info!(
        strategy = %config.strategy,
        target = %config.target_keyword,
        "Autoscaler configured"
    );

    let health_registry = HealthRegistry::new();
    for component in components::ALL {
        health_registry.register(component).await;
    }

    let metrics = AppMetrics::new();
    let logger = StructuredLogger::new("inference-autoscaler");
    logger.log_startup(AUTOSCALER_VERSION, config.strategy);

    let scaling_state = ScalingState::new(config.strategy);
    metrics.set_capacity(scaling_state.replicas(), scaling_state.cpu_quota());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    // Routing runs whether or not the scaling subsystem comes up
    let dispatcher = HttpDispatcher::new(config.endpoints()?, config.request_timeout())?;
    let router = Arc::new(
        LoadRouter::new(scaling_state.clone(), Arc::new(dispatcher), logger.clone())
            .with_health(health_registry.clone()),
    );

    let event_source = MqttEventSource::new(
        config.event_source(),
        router.clone(),
        health_registry.clone(),
    );
    tasks.push(tokio::spawn(event_source.run(shutdown_tx.subscribe())));
    tasks.push(tokio::spawn(
        NetworkMonitor::new().run(shutdown_tx.subscribe()),
    ));

    let engine = match start_scaling(
        &config,
        &scaling_state,
        &health_registry,
        &logger,
        &shutdown_tx,
        &mut tasks,
    )
    .await
    {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Scaling subsystem unavailable");
            mark_scaling_unavailable(&health_registry, &format!("{:#}", e)).await;
            None
        }
    };

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        router,
        engine,
        scaling_state,
    ));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server stopped with error"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Discover the scaled container and start the sampler and decision engine
///
/// Returns `None` when the scaled container is not running; routing keeps
/// working in that case.
async fn start_scaling(
    config: &config::AppConfig,
    scaling_state: &ScalingState,
    health_registry: &HealthRegistry,
    logger: &StructuredLogger,
    shutdown_tx: &broadcast::Sender<()>,
    tasks: &mut Vec<tokio::task::JoinHandle<()>>,
) -> Result<Option<Arc<ScalingEngine>>> {
    let docker = Arc::new(
        DockerRuntime::connect()
            .await
            .context("Failed to connect to container runtime")?,
    );

    let discovery =
        discover_targets(docker.as_ref(), &config.monitor_rules()?, &config.target_keyword)
            .await?;

    let Some(target) = discovery.target else {
        warn!(keyword = %config.target_keyword, "Scaled container not found, scaling disabled");
        mark_scaling_unavailable(
            health_registry,
            &format!("no container matches '{}'", config.target_keyword),
        )
        .await;
        return Ok(None);
    };

    let policy = config.policy();
    let actuator: Arc<dyn Actuator> = match config.strategy {
        ScalingStrategy::Horizontal => Arc::new(
            HorizontalActuator::new(scaling_state.clone(), policy.clone(), logger.clone())
                .with_provisioning_delay(config.provisioning_delay()),
        ),
        ScalingStrategy::Vertical => {
            let admin: Arc<dyn ContainerAdmin> = docker.clone();
            Arc::new(
                VerticalActuator::new(
                    scaling_state.clone(),
                    policy.clone(),
                    admin,
                    target.clone(),
                    logger.clone(),
                )
                .with_admin_timeout(config.admin_timeout()),
            )
        }
    };

    let publisher: Arc<dyn MetricsPublisher> = if config.pushgateway_url.is_empty() {
        Arc::new(NoopPublisher)
    } else {
        Arc::new(PushGatewayPublisher::new(
            &config.pushgateway_url,
            &config.push_job,
            config.request_timeout(),
        )?)
    };

    let source: Arc<dyn StatsSource> = docker;
    let (sampler, readings) = TelemetrySampler::new(
        source,
        discovery.monitored,
        target,
        scaling_state.clone(),
        publisher,
        health_registry.clone(),
        config.sampler_config(),
    );

    let engine = Arc::new(ScalingEngine::new(
        policy,
        scaling_state.clone(),
        actuator,
        logger.clone(),
    ));

    tasks.push(tokio::spawn(sampler.run(shutdown_tx.subscribe())));
    tasks.push(tokio::spawn(
        engine.clone().run(readings, shutdown_tx.subscribe()),
    ));

    Ok(Some(engine))
}

/// Neither the sampler nor the engine runs without a scaled container
async fn mark_scaling_unavailable(health: &HealthRegistry, reason: &str) {
    health.set_unhealthy(components::SAMPLER, reason).await;
    health.set_unhealthy(components::SCALER, reason).await;
}
