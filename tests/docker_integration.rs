//! Tests against a real docker host (`DOCKER_HOST` or the local socket).
//!
//! They pull `docker:<version>-dind` and run it privileged, so they are
//! ignored by default:
//!
//! ```text
//! cargo test --test docker_integration -- --ignored --test-threads=1
//! ```

use dindtest::domain::ErrorKind;
use dindtest::{BollardRuntime, ContainerRuntime, DaemonConfig, DaemonHandle, Endpoint};
use std::collections::HashSet;

const VERSIONS: &[&str] = &["1.8", "1.9", "1.10"];

#[tokio::test]
#[ignore = "requires a docker daemon that allows privileged containers"]
async fn test_client() {
    let mut daemon = DaemonHandle::new(DaemonConfig::default()).await.unwrap();

    let client = daemon.client().unwrap();
    let ping = client.ping().await;

    daemon.close().await.unwrap();
    ping.unwrap();
}

#[tokio::test]
#[ignore = "requires a docker daemon that allows privileged containers"]
async fn test_url() {
    let mut daemon = DaemonHandle::new_version("").await.unwrap();

    let url = daemon.url();
    let port: u16 = url
        .strip_prefix("tcp://127.0.0.1:")
        .and_then(|rest| rest.strip_suffix('/'))
        .and_then(|port| port.parse().ok())
        .unwrap();
    assert!(port > 0);

    let client = BollardRuntime::connect(&Endpoint::new("127.0.0.1", port)).unwrap();
    let ping = client.ping().await;

    daemon.close().await.unwrap();
    ping.unwrap();
}

#[tokio::test]
#[ignore = "requires a docker daemon that allows privileged containers"]
async fn test_versions() {
    for version in VERSIONS {
        let mut daemon = DaemonHandle::new_version(version)
            .await
            .unwrap_or_else(|e| panic!("version {version}: {e:?}"));

        let client = daemon.client().unwrap();
        let ping = client.ping().await;

        daemon.close().await.unwrap();
        ping.unwrap_or_else(|e| panic!("version {version}: {e}"));
    }
}

#[tokio::test]
#[ignore = "requires a docker daemon that allows privileged containers"]
async fn test_closed_daemon_is_unreachable() {
    let mut daemon = DaemonHandle::new(DaemonConfig::default()).await.unwrap();
    let client = daemon.client().unwrap();
    client.ping().await.unwrap();

    daemon.close().await.unwrap();

    assert!(client.ping().await.is_err());
    let err = daemon.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Removal);
}

#[tokio::test]
#[ignore = "requires a docker daemon that allows privileged containers"]
async fn test_nonexistent_version() {
    let err = DaemonHandle::new_version("nonexistent-version")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pull);
}

#[tokio::test]
#[ignore = "requires a docker daemon that allows privileged containers"]
async fn test_concurrent_daemons() {
    let (a, b, c) = tokio::join!(
        DaemonHandle::new(DaemonConfig::default()),
        DaemonHandle::new(DaemonConfig::default()),
        DaemonHandle::new(DaemonConfig::default()),
    );
    let mut daemons = vec![a.unwrap(), b.unwrap(), c.unwrap()];

    let ports: HashSet<u16> = daemons.iter().filter_map(|d| d.port()).collect();
    assert_eq!(ports.len(), daemons.len());

    for daemon in &daemons {
        daemon.client().unwrap().ping().await.unwrap();
    }
    for daemon in &mut daemons {
        daemon.close().await.unwrap();
    }
}
