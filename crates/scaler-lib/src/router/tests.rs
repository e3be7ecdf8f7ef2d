//! Router and dispatcher tests

#[cfg(test)]
mod router_tests {
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{InboundEvent, ScalingStrategy};
    use crate::observability::StructuredLogger;
    use crate::router::{
        parse_event, partition, DispatchError, Dispatcher, Endpoints, ErrorResponse,
        HttpDispatcher, LoadRouter, RouteOutcome, RouterStats,
    };
    use crate::scaling::ScalingState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingDispatcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Dispatcher for CountingDispatcher {
        async fn dispatch(
            &self,
            event: &InboundEvent,
        ) -> Result<serde_json::Value, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DispatchError::Transport("connection refused".to_string()));
            }
            Ok(json!({ "prediction": event.kind().as_str() }))
        }
    }

    fn router(replicas: u32) -> (LoadRouter, Arc<CountingDispatcher>) {
        let state = ScalingState::with_capacity(ScalingStrategy::Horizontal, replicas, 1.0);
        let dispatcher = Arc::new(CountingDispatcher::default());
        let router = LoadRouter::new(state, dispatcher.clone(), StructuredLogger::new("test"));
        (router, dispatcher)
    }

    fn image(path: &str) -> InboundEvent {
        InboundEvent::Image {
            image_path: path.to_string(),
        }
    }

    /// First key in a deterministic sequence owned by `owner`
    fn key_owned_by(owner: u32, replicas: u32) -> String {
        (0..)
            .map(|i| format!("/images/{}.png", i))
            .find(|k| partition(k, replicas) == owner)
            .unwrap()
    }

    #[test]
    fn test_partition_is_deterministic() {
        let a = partition("/images/cat.png", 3);
        let b = partition("/images/cat.png", 3);
        assert_eq!(a, b);
        assert!(a < 3);
    }

    #[test]
    fn test_partition_single_replica_always_zero() {
        for i in 0..200 {
            assert_eq!(partition(&format!("key-{}", i), 1), 0);
        }
        // Zero replicas behaves like one
        assert_eq!(partition("key", 0), 0);
    }

    #[test]
    fn test_partition_spreads_keys() {
        let owned = (0..3000)
            .filter(|i| partition(&format!("/images/{}.png", i), 3) == 0)
            .count();
        assert!(
            (800..=1200).contains(&owned),
            "expected about a third, got {}",
            owned
        );
    }

    #[tokio::test]
    async fn test_single_replica_forwards_every_image() {
        let (router, dispatcher) = router(1);

        for i in 0..50 {
            let outcome = router.route(&image(&format!("/img/{}.jpg", i))).await.unwrap();
            assert!(matches!(outcome, RouteOutcome::Dispatched(_)));
        }
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_image_owned_by_other_replica_is_shed() {
        let (router, dispatcher) = router(2);
        let key = key_owned_by(1, 2);

        let outcome = router.route(&image(&key)).await.unwrap();

        assert_eq!(
            outcome,
            RouteOutcome::Shed {
                partition: 1,
                replicas: 2
            }
        );
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        // Shedding is not a failure
        assert_eq!(
            router.stats(),
            RouterStats {
                dispatched: 0,
                errors: 0,
                shed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_image_owned_by_first_replica_is_dispatched() {
        let (router, dispatcher) = router(2);
        let key = key_owned_by(0, 2);

        let outcome = router.route(&image(&key)).await.unwrap();

        assert_eq!(outcome, RouteOutcome::Dispatched(json!({ "prediction": "image" })));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_roughly_one_in_n_images_forwarded() {
        let (router, dispatcher) = router(3);

        for i in 0..3000 {
            router
                .route(&image(&format!("/images/{}.png", i)))
                .await
                .unwrap();
        }

        let forwarded = dispatcher.calls.load(Ordering::SeqCst);
        assert!((800..=1200).contains(&forwarded), "forwarded {}", forwarded);
    }

    #[tokio::test]
    async fn test_router_follows_replica_changes() {
        let state = ScalingState::with_capacity(ScalingStrategy::Horizontal, 2, 1.0);
        let dispatcher = Arc::new(CountingDispatcher::default());
        let router = LoadRouter::new(state.clone(), dispatcher.clone(), StructuredLogger::new("test"));
        let key = key_owned_by(1, 2);

        assert!(matches!(
            router.route(&image(&key)).await.unwrap(),
            RouteOutcome::Shed { .. }
        ));

        state.try_begin().unwrap().commit_replicas(1);

        assert!(matches!(
            router.route(&image(&key)).await.unwrap(),
            RouteOutcome::Dispatched(_)
        ));
    }

    #[tokio::test]
    async fn test_other_kinds_ignore_replica_count() {
        let (router, dispatcher) = router(3);

        for i in 0..30 {
            let features = vec![i as f64, 1.5];
            router
                .route(&InboundEvent::Numeric {
                    features: features.clone(),
                })
                .await
                .unwrap();
            router
                .route(&InboundEvent::Classification { features })
                .await
                .unwrap();
        }

        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 60);
    }

    #[tokio::test]
    async fn test_handle_payload_parses_records() {
        let (router, _) = router(1);

        let outcome = router
            .handle_payload(br#"{"type":"numeric","features":[1.0,2.0]}"#)
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Dispatched(json!({ "prediction": "numeric" })));
    }

    #[tokio::test]
    async fn test_handle_payload_rejects_unknown_type() {
        let (router, dispatcher) = router(1);

        let err = router
            .handle_payload(br#"{"type":"audio","samples":[1]}"#)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::UnsupportedType(ref t) if t == "audio"));
        assert_eq!(err.status_code(), 400);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.stats().errors, 1);
    }

    #[test]
    fn test_parse_event_errors() {
        assert!(matches!(
            parse_event(b"not json"),
            Err(DispatchError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_event(br#"{"features":[1]}"#),
            Err(DispatchError::UnsupportedType(_))
        ));
        assert!(matches!(
            parse_event(br#"{"type":"image"}"#),
            Err(DispatchError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_failure_degrades_router() {
        let state = ScalingState::new(ScalingStrategy::Horizontal);
        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let health = HealthRegistry::new();
        health.register(components::ROUTER).await;
        let router = LoadRouter::new(state, dispatcher, StructuredLogger::new("test"))
            .with_health(health.clone());

        let err = router
            .route(&InboundEvent::Numeric { features: vec![1.0] })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 502);
        assert_eq!(
            health.status_of(components::ROUTER).await,
            Some(ComponentStatus::Degraded)
        );
        assert_eq!(router.stats().errors, 1);
        assert_eq!(router.stats().dispatched, 0);
    }

    #[tokio::test]
    async fn test_stats_count_each_outcome_once() {
        let (router, _) = router(2);

        router.route(&image(&key_owned_by(0, 2))).await.unwrap();
        router.route(&image(&key_owned_by(1, 2))).await.unwrap();
        router
            .route(&InboundEvent::Numeric { features: vec![1.0] })
            .await
            .unwrap();
        let _ = router.handle_payload(b"not json").await;

        assert_eq!(
            router.stats(),
            RouterStats {
                dispatched: 2,
                errors: 1,
                shed: 1
            }
        );
    }

    #[test]
    fn test_error_response_payload() {
        let err = DispatchError::UnsupportedType("audio".to_string());
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body, json!({ "error": "Unsupported data type: audio" }));
    }

    #[test]
    fn test_shed_outcome_serialization() {
        let value = serde_json::to_value(RouteOutcome::Shed {
            partition: 2,
            replicas: 3,
        })
        .unwrap();
        assert_eq!(value, json!({ "partition": 2, "replicas": 3 }));
    }

    fn endpoints(base: &str) -> Endpoints {
        Endpoints::new(
            &format!("{}/numeric/predict", base),
            &format!("{}/classification/predict", base),
            &format!("{}/image/predict", base),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_dispatcher_posts_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/image/predict")
            .match_body(mockito::Matcher::Json(json!({ "image_path": "/tmp/cat.png" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"label":"cat"}"#)
            .create_async()
            .await;

        let dispatcher =
            HttpDispatcher::new(endpoints(&server.url()), Duration::from_secs(5)).unwrap();
        let response = dispatcher.dispatch(&image("/tmp/cat.png")).await.unwrap();

        assert_eq!(response, json!({ "label": "cat" }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_dispatcher_maps_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/numeric/predict")
            .with_status(500)
            .with_body("model crashed")
            .create_async()
            .await;

        let dispatcher =
            HttpDispatcher::new(endpoints(&server.url()), Duration::from_secs(5)).unwrap();
        let err = dispatcher
            .dispatch(&InboundEvent::Numeric { features: vec![1.0] })
            .await
            .unwrap_err();

        match err {
            DispatchError::Status { status, ref body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model crashed");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn test_http_dispatcher_unreachable_service() {
        let dispatcher =
            HttpDispatcher::new(endpoints("http://127.0.0.1:1"), Duration::from_secs(2)).unwrap();
        let err = dispatcher
            .dispatch(&InboundEvent::Classification { features: vec![0.5] })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Transport(_)));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(Endpoints::new("not a url", "http://a/", "http://b/").is_err());
    }
}
