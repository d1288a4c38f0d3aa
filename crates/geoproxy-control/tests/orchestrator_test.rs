//! Orchestrator behaviour against a controllable backend executor

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geoproxy_backend::{
    BackendError, BackendExecutor, CreatedUnit, MockBackendExecutor, UnitRequest,
};
use geoproxy_catalog::{CatalogConfig, ServerCatalog};
use geoproxy_control::{
    InstanceState, Orchestrator, OrchestratorConfig, OrchestratorError, StartSelector,
};

/// Hand-rolled executor double with observable call effects
#[derive(Default)]
struct TestExecutor {
    create_delay: Duration,
    fail_create: AtomicBool,
    created: AtomicUsize,
    destroyed: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl BackendExecutor for TestExecutor {
    async fn create_unit(&self, request: UnitRequest) -> Result<CreatedUnit, BackendError> {
        tokio::time::sleep(self.create_delay).await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BackendError::Create("simulated failure".into()));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        assert!(!request.credentials.username.is_empty());
        Ok(CreatedUnit {
            handle: format!("unit-{n}"),
            address: format!("10.0.0.{n}:8888"),
        })
    }

    async fn stop_unit(&self, handle: &str) -> Result<(), BackendError> {
        self.stopped.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    async fn destroy_unit(&self, handle: &str) -> Result<(), BackendError> {
        // Destroying an already-gone unit is success, like real adapters
        self.destroyed.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    async fn list_units(&self) -> Result<Vec<String>, BackendError> {
        Ok(Vec::new())
    }

    async fn fetch_server_payload(&self, _timeout: Duration) -> Result<String, BackendError> {
        Err(BackendError::Create("live fetch disabled in tests".into()))
    }
}

fn test_catalog() -> Arc<ServerCatalog> {
    let payload = r#"{"mullvad": {"servers": [
        {"vpn": "wireguard", "hostname": "us-nyc-wg-301", "country": "USA",
         "city": "New York NY", "ips": ["198.51.100.1"], "wgpubkey": "pk1"},
        {"vpn": "wireguard", "hostname": "us-nyc-wg-302", "country": "USA",
         "city": "New York NY", "ips": ["198.51.100.2"], "wgpubkey": "pk2"},
        {"vpn": "wireguard", "hostname": "se-sto-wg-001", "country": "Sweden",
         "city": "Stockholm", "ips": ["203.0.113.7"], "wgpubkey": "pk3"}
    ]}}"#;
    Arc::new(ServerCatalog::new(CatalogConfig {
        inline_payload: Some(payload.to_string()),
        ..CatalogConfig::new()
    }))
}

fn orchestrator_with(executor: Arc<dyn BackendExecutor>, limit: usize) -> Orchestrator {
    Orchestrator::new(
        test_catalog(),
        executor,
        OrchestratorConfig {
            instance_limit: limit,
            listen_port: 8888,
        },
    )
}

#[tokio::test]
async fn concurrent_starts_never_exceed_the_limit() {
    let executor = Arc::new(TestExecutor {
        create_delay: Duration::from_millis(25),
        ..TestExecutor::default()
    });
    let orchestrator = Arc::new(orchestrator_with(executor.clone(), 3));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .start(StartSelector::location(Some("USA".into()), None))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    let mut limit_errors = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(OrchestratorError::InstanceLimitReached { limit }) => {
                assert_eq!(limit, 3);
                limit_errors += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 3);
    assert_eq!(limit_errors, 13);
    assert_eq!(orchestrator.instance_count(), 3);
    assert_eq!(executor.created.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn limit_one_start_destroy_start_scenario() {
    let executor = Arc::new(TestExecutor::default());
    let orchestrator = orchestrator_with(executor.clone(), 1);

    let first = orchestrator
        .start(StartSelector::key("usa-new-york-ny-us-nyc-wg-301"))
        .await
        .unwrap();

    let second = orchestrator
        .start(StartSelector::key("usa-new-york-ny-us-nyc-wg-301"))
        .await;
    assert!(matches!(
        second,
        Err(OrchestratorError::InstanceLimitReached { limit: 1 })
    ));

    orchestrator.destroy(&first.id).await.unwrap();

    let third = orchestrator
        .start(StartSelector::key("usa-new-york-ny-us-nyc-wg-301"))
        .await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let executor = Arc::new(TestExecutor::default());
    let orchestrator = orchestrator_with(executor.clone(), 2);

    let started = orchestrator
        .start(StartSelector::location(Some("sweden".into()), None))
        .await
        .unwrap();

    orchestrator.destroy(&started.id).await.unwrap();
    assert!(orchestrator.status().is_empty());

    // Second destroy behaves exactly like a destroy on an unknown id
    let again = orchestrator.destroy(&started.id).await;
    assert!(matches!(again, Err(OrchestratorError::InstanceNotFound(_))));
    let unknown = orchestrator.destroy("never-existed").await;
    assert!(matches!(unknown, Err(OrchestratorError::InstanceNotFound(_))));
}

#[tokio::test]
async fn unknown_server_key_leaves_registry_untouched() {
    let executor = Arc::new(TestExecutor::default());
    let orchestrator = orchestrator_with(executor.clone(), 2);

    let before = orchestrator.status().len();
    let result = orchestrator
        .start(StartSelector::key("nonexistent-key"))
        .await;

    assert!(matches!(result, Err(OrchestratorError::UnknownServer(ref k)) if k == "nonexistent-key"));
    assert_eq!(orchestrator.status().len(), before);
    assert_eq!(executor.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn start_then_status_round_trip() {
    let executor = Arc::new(TestExecutor::default());
    let orchestrator = orchestrator_with(executor, 2);

    let started = orchestrator
        .start(StartSelector::location(
            Some("USA".into()),
            Some("New York".into()),
        ))
        .await
        .unwrap();

    let status = orchestrator.status();
    assert_eq!(status.len(), 1);
    let record = &status[&started.id];
    assert_eq!(record.state, InstanceState::Running);

    // First match in catalog order for USA/New York
    assert_eq!(record.server, "usa-new-york-ny-us-nyc-wg-301");
    assert!(record.proxy.starts_with("http://"));
    assert!(record.proxy.ends_with("@10.0.0.0:8888"));

    // The recorded server key resolves back to a New York USA entry
    let servers = orchestrator.servers(Some("USA"), Some("New York"), false).await;
    assert!(servers.iter().any(|s| s.key == record.server));
}

#[tokio::test]
async fn no_matching_location_is_a_selector_error() {
    let orchestrator = orchestrator_with(Arc::new(TestExecutor::default()), 2);
    let result = orchestrator
        .start(StartSelector::location(Some("Atlantis".into()), None))
        .await;
    assert!(matches!(result, Err(OrchestratorError::NoMatchingServer(_))));

    let empty = orchestrator.start(StartSelector::default()).await;
    assert!(matches!(empty, Err(OrchestratorError::SelectorRequired)));
}

#[tokio::test]
async fn failed_create_releases_the_capacity_slot() {
    let executor = Arc::new(TestExecutor::default());
    executor.fail_create.store(true, Ordering::SeqCst);
    let orchestrator = orchestrator_with(executor.clone(), 1);

    let result = orchestrator
        .start(StartSelector::location(Some("USA".into()), None))
        .await;
    assert!(matches!(result, Err(OrchestratorError::Backend(_))));
    assert!(orchestrator.status().is_empty(), "no partial record");

    // The reserved slot must be usable again
    executor.fail_create.store(false, Ordering::SeqCst);
    let retry = orchestrator
        .start(StartSelector::location(Some("USA".into()), None))
        .await;
    assert!(retry.is_ok());
}

#[tokio::test]
async fn stop_marks_the_instance_stopped_but_keeps_it_registered() {
    let executor = Arc::new(TestExecutor::default());
    let orchestrator = orchestrator_with(executor.clone(), 1);

    let started = orchestrator
        .start(StartSelector::location(Some("USA".into()), None))
        .await
        .unwrap();
    orchestrator.stop(&started.id).await.unwrap();

    let status = orchestrator.status();
    assert_eq!(status[&started.id].state, InstanceState::Stopped);
    assert_eq!(executor.stopped.lock().unwrap().len(), 1);

    // Stopped instances still hold their capacity slot until destroyed
    let blocked = orchestrator
        .start(StartSelector::location(Some("USA".into()), None))
        .await;
    assert!(matches!(
        blocked,
        Err(OrchestratorError::InstanceLimitReached { .. })
    ));

    orchestrator.destroy(&started.id).await.unwrap();
    assert!(orchestrator.status().is_empty());
}

#[tokio::test]
async fn stop_unsupported_backend_propagates_without_state_change() {
    let mut mock = MockBackendExecutor::new();
    mock.expect_create_unit().returning(|_| {
        Ok(CreatedUnit {
            handle: "pod-1".into(),
            address: "10.42.0.5:8888".into(),
        })
    });
    mock.expect_stop_unit()
        .returning(|_| Err(BackendError::StopUnsupported));

    let orchestrator = orchestrator_with(Arc::new(mock), 1);
    let started = orchestrator
        .start(StartSelector::location(Some("USA".into()), None))
        .await
        .unwrap();

    let result = orchestrator.stop(&started.id).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::Backend(BackendError::StopUnsupported))
    ));
    assert_eq!(
        orchestrator.status()[&started.id].state,
        InstanceState::Running
    );
}

#[tokio::test]
async fn orphan_cleanup_destroys_only_untracked_units() {
    let mut mock = MockBackendExecutor::new();
    mock.expect_create_unit().returning(|_| {
        Ok(CreatedUnit {
            handle: "unit-tracked".into(),
            address: "10.0.0.1:8888".into(),
        })
    });
    mock.expect_list_units().returning(|| {
        Ok(vec![
            "unit-tracked".to_string(),
            "unit-orphan-a".to_string(),
            "unit-orphan-b".to_string(),
        ])
    });
    mock.expect_destroy_unit()
        .withf(|handle| handle.starts_with("unit-orphan-"))
        .times(2)
        .returning(|_| Ok(()));

    let orchestrator = orchestrator_with(Arc::new(mock), 2);
    orchestrator
        .start(StartSelector::location(Some("USA".into()), None))
        .await
        .unwrap();

    let removed = orchestrator.cleanup_orphaned_units().await;
    assert_eq!(removed, 2);
    // The tracked instance is untouched
    assert_eq!(orchestrator.status().len(), 1);
}

#[tokio::test]
async fn destroy_failure_keeps_the_record_for_retry() {
    let mut mock = MockBackendExecutor::new();
    mock.expect_create_unit().returning(|_| {
        Ok(CreatedUnit {
            handle: "unit-1".into(),
            address: "10.0.0.1:8888".into(),
        })
    });
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_mock = attempts.clone();
    mock.expect_destroy_unit().returning(move |_| {
        if attempts_in_mock.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(BackendError::Transport("connection reset".into()))
        } else {
            Ok(())
        }
    });

    let orchestrator = orchestrator_with(Arc::new(mock), 1);
    let started = orchestrator
        .start(StartSelector::location(Some("USA".into()), None))
        .await
        .unwrap();

    let first = orchestrator.destroy(&started.id).await;
    assert!(matches!(first, Err(OrchestratorError::Backend(_))));
    assert_eq!(
        orchestrator.status()[&started.id].state,
        InstanceState::Running,
        "record survives a failed destroy"
    );

    orchestrator.destroy(&started.id).await.unwrap();
    assert!(orchestrator.status().is_empty());
}
