use dindtest::domain::{Endpoint, ErrorKind, LifecycleState, RegistryAuth};
use dindtest::test_support::{MOCK_FIRST_PORT, MockConnector, MockRuntime};
use dindtest::{DaemonConfig, DaemonHandle, RuntimeConnector};
use std::fs;
use std::sync::Arc;

fn handle_with(config: DaemonConfig, mock: &Arc<MockRuntime>) -> DaemonHandle {
    DaemonHandle::with_runtime(
        config,
        mock.clone(),
        Arc::new(MockConnector::new(mock.clone())),
    )
}

#[tokio::test]
async fn test_workflow_create_use_destroy() {
    let mock = Arc::new(MockRuntime::new());
    let connector = MockConnector::new(mock.clone());
    let mut daemon = handle_with(DaemonConfig::default(), &mock);

    daemon.start().await.unwrap();

    let port = daemon.port().unwrap();
    assert_eq!(port, MOCK_FIRST_PORT);
    assert_eq!(daemon.url(), format!("tcp://127.0.0.1:{port}/"));

    // a client built from the published endpoint answers
    let endpoint = Endpoint::new("127.0.0.1", port);
    let client = connector.connect(&endpoint).unwrap();
    client.ping().await.unwrap();

    daemon.close().await.unwrap();
    assert!(matches!(daemon.state(), LifecycleState::Removed { .. }));

    // and stops answering once the container is gone
    assert!(client.ping().await.is_err());
    assert_eq!(mock.container_count(), 0);
}

#[tokio::test]
async fn test_workflow_nonexistent_version() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_missing_image("docker:nonexistent-version-dind");
    let mut daemon = handle_with(
        DaemonConfig::default().with_version("nonexistent-version"),
        &mock,
    );

    let err = daemon.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Pull);
    assert!(err.to_string().contains("docker:nonexistent-version-dind"));
    assert_eq!(daemon.id(), None);
    assert_eq!(mock.container_count(), 0);
    assert!(
        !mock.get_commands().iter().any(|c| c.starts_with("create:")),
        "no container should be created after a failed pull"
    );
}

#[tokio::test]
async fn test_workflow_versions_use_their_own_tags() {
    let mock = Arc::new(MockRuntime::new());

    for version in ["1.8", "1.9", "1.10", ""] {
        let mut daemon = handle_with(DaemonConfig::default().with_version(version), &mock);
        daemon.start().await.unwrap();
        daemon.close().await.unwrap();
    }

    let pulls: Vec<String> = mock
        .get_commands()
        .into_iter()
        .filter(|c| c.starts_with("pull:"))
        .collect();
    assert_eq!(
        pulls,
        vec![
            "pull:docker:1.8-dind",
            "pull:docker:1.9-dind",
            "pull:docker:1.10-dind",
            "pull:docker:1.10-dind",
        ]
    );
    assert_eq!(mock.container_count(), 0);
}

#[tokio::test]
async fn test_workflow_config_file_and_credentials() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("dindtest.toml");
    fs::write(
        &path,
        r#"
repository = "mirror.local/docker"
version = "1.9"

[auth]
username = "ci"
password = "secret"
"#,
    )
    .unwrap();

    let config = DaemonConfig::load(&path).unwrap();
    assert_eq!(
        config.auth,
        Some(RegistryAuth {
            username: "ci".into(),
            password: "secret".into(),
            server: None,
        })
    );

    let mock = Arc::new(MockRuntime::new());
    let mut daemon = handle_with(config, &mock);
    daemon.start().await.unwrap();

    assert_eq!(mock.get_commands()[0], "pull:mirror.local/docker:1.9-dind");
    assert_eq!(mock.pull_auth(), vec![Some("ci".to_string())]);

    daemon.close().await.unwrap();
}

#[tokio::test]
async fn test_workflow_create_failure_has_nothing_to_clean() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_fail_on("create");
    let mut daemon = handle_with(DaemonConfig::default(), &mock);

    let err = daemon.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Create);
    assert_eq!(daemon.state(), &LifecycleState::ImagePulled);
    assert!(!mock.get_commands().iter().any(|c| c.starts_with("remove:")));

    // the handle never got a container, so it may still be started
    mock.clear_fail_on();
    daemon.start().await.unwrap();
    assert!(daemon.state().is_ready());
    daemon.close().await.unwrap();
}

#[tokio::test]
async fn test_workflow_inspect_failure_chains_cleanup_error() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_fail_on("inspect");
    let mut daemon = handle_with(DaemonConfig::default(), &mock);

    let err = daemon.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Inspect);
    let cleanup = err.cleanup_error().expect("running container refuses plain removal");
    assert_eq!(cleanup.kind(), ErrorKind::Removal);

    // the id stays on the handle so a forced close can still reclaim it
    let id = daemon.id().unwrap().to_string();
    assert!(matches!(daemon.state(), LifecycleState::Started { .. }));
    mock.clear_fail_on();
    daemon.close().await.unwrap();
    assert!(mock.get_container(&id).is_none());
}

#[tokio::test]
async fn test_workflow_missing_ports_is_inspect_error() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_inspect_ports(None);
    let mut daemon = handle_with(DaemonConfig::default(), &mock);

    let err = daemon.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Inspect);
    assert_eq!(daemon.port(), None);
}
