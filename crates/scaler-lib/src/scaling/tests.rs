//! Engine and actuator tests
//!
//! Tokio time is paused so provisioning delays complete instantly while
//! still ordering concurrent requests the way real time would.

#[cfg(test)]
mod engine_tests {
    use crate::models::{AggregatedReading, ScalingStrategy, ServiceTarget};
    use crate::observability::StructuredLogger;
    use crate::runtime::ContainerAdmin;
    use crate::scaling::{
        Actuator, HorizontalActuator, ScaleError, ScaleOutcome, ScaleRequest, ScalingDecision,
        ScalingEngine, ScalingPolicy, ScalingState, VerticalActuator, WindowOutcome,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::{broadcast, watch};

    fn reading(window: u64, cpu_percent: f64) -> AggregatedReading {
        AggregatedReading {
            container_id: "image".to_string(),
            label: "Image model".to_string(),
            window,
            cpu_percent,
            memory_percent: 40.0,
            samples: 5,
            timestamp: 0,
        }
    }

    fn horizontal(state: &ScalingState) -> Arc<HorizontalActuator> {
        Arc::new(HorizontalActuator::new(
            state.clone(),
            ScalingPolicy::default(),
            StructuredLogger::new("image_model"),
        ))
    }

    fn engine(state: &ScalingState, actuator: Arc<dyn Actuator>) -> ScalingEngine {
        ScalingEngine::new(
            ScalingPolicy::default(),
            state.clone(),
            actuator,
            StructuredLogger::new("image_model"),
        )
    }

    /// Records every quota update and optionally fails them
    struct RecordingAdmin {
        calls: Mutex<Vec<(String, f64)>>,
        fail: bool,
        delay: Duration,
    }

    impl RecordingAdmin {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ContainerAdmin for RecordingAdmin {
        async fn set_cpu_quota(&self, container_id: &str, cpus: f64) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((container_id.to_string(), cpus));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("docker update exited with status 1");
            }
            Ok(())
        }
    }

    fn vertical(state: &ScalingState, admin: Arc<RecordingAdmin>) -> Arc<VerticalActuator> {
        Arc::new(VerticalActuator::new(
            state.clone(),
            ScalingPolicy::default(),
            admin,
            ServiceTarget {
                name: "image_model".to_string(),
                container_id: "c0ffee".to_string(),
            },
            StructuredLogger::new("image_model"),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_horizontal_scenario_up_up_down_down() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let engine = engine(&state, horizontal(&state));

        let mut replicas = Vec::new();
        for (window, cpu) in [85.0, 85.0, 20.0, 20.0].into_iter().enumerate() {
            engine.evaluate(&reading(window as u64, cpu)).await;
            replicas.push(state.replicas());
        }

        assert_eq!(replicas, vec![2, 3, 2, 1]);
        assert!(!state.is_scaling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_action_per_window() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let engine = engine(&state, horizontal(&state));

        let outcome = engine.evaluate(&reading(1, 95.0)).await;
        assert_eq!(
            outcome,
            WindowOutcome::Applied(ScalingDecision::Replicas { from: 1, to: 2 })
        );
        assert!(state.last_action_taken());

        // Same window again must not compound
        assert_eq!(engine.evaluate(&reading(1, 95.0)).await, WindowOutcome::Skipped);
        assert_eq!(state.replicas(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_never_exceeds_bounds() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let engine = engine(&state, horizontal(&state));

        for window in 0..10 {
            engine.evaluate(&reading(window, 100.0)).await;
            assert!((1..=3).contains(&state.replicas()));
        }
        assert_eq!(state.replicas(), 3);

        for window in 10..20 {
            engine.evaluate(&reading(window, 0.0)).await;
            assert!((1..=3).contains(&state.replicas()));
        }
        assert_eq!(state.replicas(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_load_is_idempotent() {
        let state = ScalingState::with_capacity(ScalingStrategy::Horizontal, 2, 1.0);
        let engine = engine(&state, horizontal(&state));

        for window in 0..50 {
            assert_eq!(
                engine.evaluate(&reading(window, 50.0)).await,
                WindowOutcome::NoChange
            );
        }
        assert_eq!(state.replicas(), 2);
        assert_eq!(state.cpu_quota(), 1.0);
        assert!(!state.last_action_taken());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_horizontal_request_is_rejected() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let actuator = horizontal(&state);

        let first = {
            let actuator = actuator.clone();
            tokio::spawn(async move { actuator.scale_to(2).await })
        };
        while !state.is_scaling() {
            tokio::task::yield_now().await;
        }

        let second = actuator.scale_to(3).await.unwrap();
        assert_eq!(second, ScaleOutcome::InProgress);
        assert_eq!(state.replicas(), 1);

        let first = first.await.unwrap().unwrap();
        assert_eq!(
            first,
            ScaleOutcome::Applied {
                decision: ScalingDecision::Replicas { from: 1, to: 2 }
            }
        );
        assert_eq!(state.replicas(), 2);
        assert!(!state.is_scaling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replica_commit_waits_for_provisioning() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let actuator = Arc::new(
            HorizontalActuator::new(
                state.clone(),
                ScalingPolicy::default(),
                StructuredLogger::new("image_model"),
            )
            .with_provisioning_delay(Duration::from_secs(15)),
        );

        let task = {
            let actuator = actuator.clone();
            tokio::spawn(async move { actuator.scale_to(2).await })
        };
        while !state.is_scaling() {
            tokio::task::yield_now().await;
        }

        // Readers keep seeing the committed value while provisioning
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(state.replicas(), 1);

        task.await.unwrap().unwrap();
        assert_eq!(state.replicas(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_clamped() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let actuator = horizontal(&state);

        actuator.scale_to(10).await.unwrap();
        assert_eq!(state.replicas(), 3);

        actuator.scale_to(0).await.unwrap();
        assert_eq!(state.replicas(), 1);

        assert_eq!(actuator.scale_to(1).await.unwrap(), ScaleOutcome::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_provisioning() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let engine = Arc::new(engine(&state, horizontal(&state)));

        let (readings_tx, readings_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(engine.clone().run(readings_rx, shutdown_rx));

        readings_tx.send(Some(reading(1, 90.0))).unwrap();
        while !state.is_scaling() {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(!state.is_scaling());
        assert_eq!(state.replicas(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_consumes_readings_until_closed() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let engine = Arc::new(engine(&state, horizontal(&state)));

        let (readings_tx, readings_rx) = watch::channel(None);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(engine.clone().run(readings_rx, shutdown_rx));

        readings_tx.send(Some(reading(1, 90.0))).unwrap();
        while state.replicas() != 2 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        drop(readings_tx);
        handle.await.unwrap();
        assert_eq!(state.snapshot().last_window, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ignores_windows_closed_during_provisioning() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let engine = Arc::new(engine(&state, horizontal(&state)));

        let (readings_tx, readings_rx) = watch::channel(None);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(engine.clone().run(readings_rx, shutdown_rx));

        readings_tx.send(Some(reading(1, 85.0))).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(state.is_scaling());

        // Sampled entirely before the new replica is live
        readings_tx.send(Some(reading(2, 85.0))).unwrap();
        tokio::time::sleep(Duration::from_secs(26)).await;

        assert_eq!(state.replicas(), 2);
        assert!(!state.is_scaling());
        assert_eq!(state.snapshot().last_window, Some(1));

        // A window closed after the commit is evaluated normally
        readings_tx.send(Some(reading(3, 85.0))).unwrap();
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(state.replicas(), 3);

        drop(readings_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_vertical_scale_up_and_down() {
        let state = ScalingState::new(ScalingStrategy::Vertical);
        let admin = Arc::new(RecordingAdmin::new(false));
        let engine = engine(&state, vertical(&state, admin.clone()));

        engine.evaluate(&reading(1, 90.0)).await;
        engine.evaluate(&reading(2, 90.0)).await;
        engine.evaluate(&reading(3, 90.0)).await;
        assert_eq!(state.cpu_quota(), 3.0);

        engine.evaluate(&reading(4, 10.0)).await;
        assert_eq!(state.cpu_quota(), 2.0);

        let calls = admin.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("c0ffee".to_string(), 2.0),
                ("c0ffee".to_string(), 3.0),
                ("c0ffee".to_string(), 2.0),
            ]
        );
        // Vertical scaling never touches the replica count
        assert_eq!(state.replicas(), 1);
    }

    #[tokio::test]
    async fn test_vertical_failure_leaves_state_unchanged() {
        let state = ScalingState::new(ScalingStrategy::Vertical);
        let admin = Arc::new(RecordingAdmin::new(true));
        let engine = engine(&state, vertical(&state, admin.clone()));

        let outcome = engine.evaluate(&reading(1, 90.0)).await;
        assert!(matches!(outcome, WindowOutcome::Failed(_)));
        assert_eq!(state.cpu_quota(), 1.0);
        assert!(!state.is_scaling());
        assert!(!state.last_action_taken());

        // Next window retries while the threshold still holds
        engine.evaluate(&reading(2, 90.0)).await;
        assert_eq!(admin.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vertical_timeout_is_recoverable() {
        let state = ScalingState::new(ScalingStrategy::Vertical);
        let admin = Arc::new(RecordingAdmin {
            calls: Mutex::new(Vec::new()),
            fail: false,
            delay: Duration::from_secs(60),
        });
        let actuator = VerticalActuator::new(
            state.clone(),
            ScalingPolicy::default(),
            admin,
            ServiceTarget {
                name: "image_model".to_string(),
                container_id: "c0ffee".to_string(),
            },
            StructuredLogger::new("image_model"),
        )
        .with_admin_timeout(Duration::from_secs(5));

        let result = actuator.scale_to(2.0).await;
        assert!(matches!(result, Err(ScaleError::Timeout(_))));
        assert_eq!(state.cpu_quota(), 1.0);
        assert!(!state.is_scaling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_request_goes_through_single_flight() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let engine = Arc::new(engine(&state, horizontal(&state)));

        let automatic = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.evaluate(&reading(1, 90.0)).await })
        };
        while !state.is_scaling() {
            tokio::task::yield_now().await;
        }

        let manual = engine
            .request(&ScaleRequest {
                replicas: Some(3),
                cpus: None,
            })
            .await
            .unwrap();
        assert_eq!(manual, ScaleOutcome::InProgress);

        automatic.await.unwrap();
        assert_eq!(state.replicas(), 2);
    }

    #[tokio::test]
    async fn test_manual_request_strategy_mismatch() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let engine = engine(&state, horizontal(&state));

        let result = engine
            .request(&ScaleRequest {
                replicas: None,
                cpus: Some(2.0),
            })
            .await;
        assert!(matches!(result, Err(ScaleError::StrategyMismatch { .. })));

        let result = engine.request(&ScaleRequest::default()).await;
        assert!(matches!(result, Err(ScaleError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_actuator_rejects_foreign_decision() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let result = horizontal(&state)
            .apply(ScalingDecision::CpuQuota { from: 1.0, to: 2.0 })
            .await;

        assert!(matches!(result, Err(ScaleError::StrategyMismatch { .. })));
        assert!(!state.is_scaling());
    }
}
