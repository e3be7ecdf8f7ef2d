//! MQTT subscription feeding the load router

use super::balancer::{LoadRouter, RouteOutcome};
use crate::health::{components, HealthRegistry};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Configuration for the inbound event stream
#[derive(Debug, Clone)]
pub struct EventSourceConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Wait before polling again after a connection error (default: 5 seconds)
    pub reconnect_backoff: Duration,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            host: "rabbitmq".to_string(),
            port: 1883,
            topic: "data_influx".to_string(),
            client_id: "inference-autoscaler".to_string(),
            keep_alive: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

/// Subscribes to the inbound topic and hands every record to the router
pub struct MqttEventSource {
    config: EventSourceConfig,
    router: Arc<LoadRouter>,
    health: HealthRegistry,
}

impl MqttEventSource {
    pub fn new(config: EventSourceConfig, router: Arc<LoadRouter>, health: HealthRegistry) -> Self {
        Self {
            config,
            router,
            health,
        }
    }

    fn connect(&self) -> (AsyncClient, EventLoop) {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        AsyncClient::new(options, 10)
    }

    /// Consume until shutdown; connection errors are retried forever
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            host = %self.config.host,
            port = self.config.port,
            topic = %self.config.topic,
            "Starting event source"
        );

        let (client, mut eventloop) = self.connect();

        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            // Subscriptions do not survive a clean reconnect
                            if let Err(e) = client
                                .subscribe(self.config.topic.as_str(), QoS::AtMostOnce)
                                .await
                            {
                                warn!(error = %e, "Failed to subscribe to event topic");
                                continue;
                            }
                            self.health.set_healthy(components::EVENT_SOURCE).await;
                            info!(topic = %self.config.topic, "Subscribed to event topic");
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let router = self.router.clone();
                            tokio::spawn(async move {
                                handle_record(&router, &publish.payload).await;
                            });
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(
                                error = %e,
                                backoff_secs = self.config.reconnect_backoff.as_secs(),
                                "Event stream connection error"
                            );
                            self.health
                                .set_unhealthy(components::EVENT_SOURCE, e.to_string())
                                .await;

                            tokio::select! {
                                _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
                                _ = shutdown.recv() => break,
                            }
                        }
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "Event stream disconnect failed");
        }
        info!("Shutting down event source");
    }
}

async fn handle_record(router: &LoadRouter, payload: &[u8]) {
    match router.handle_payload(payload).await {
        Ok(RouteOutcome::Dispatched(response)) => {
            debug!(response = %response, "Prediction received");
        }
        Ok(RouteOutcome::Shed { .. }) => {}
        Err(e) => {
            warn!(error = %e, "Failed to handle event");
        }
    }
}
