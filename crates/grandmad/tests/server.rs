//! Daemon integration tests

use grandmad::{DaemonConfig, DaemonError, LogDeliverer, Server};
use grandma_cluster::ClusterMode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn start(config: DaemonConfig) -> (Arc<LogDeliverer>, Server) {
    let deliverer = Arc::new(LogDeliverer::new());
    let server = Server::start(config, deliverer.clone(), deliverer.clone())
        .await
        .unwrap();
    (deliverer, server)
}

async fn stop(server: Server) {
    server.shutdown_handle().shutdown();
    timeout(Duration::from_secs(5), server.wait()).await.unwrap();
}

#[tokio::test]
async fn test_standalone_delivers_due_request() {
    let (deliverer, server) = start(DaemonConfig::default()).await;
    assert_eq!(server.mode(), ClusterMode::Standalone);

    let placement = server.submit(106, "ops@example.com", "hello", 0).await.unwrap();
    assert!(placement.is_local());

    timeout(Duration::from_secs(5), async {
        while deliverer.delivered() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let placement = server.submit(105, "conn-7.chat", "{}", 0).await.unwrap();
    assert!(placement.is_local());
    timeout(Duration::from_secs(5), async {
        while deliverer.pushed() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    stop(server).await;
}

#[tokio::test]
async fn test_unsupported_kind_rejected() {
    let config = DaemonConfig::from_yaml("msg_types: [106]").unwrap();
    let (_, server) = start(config).await;

    let err = server.submit(109, "+15550100", "hi", 0).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(server.scheduler().pending_count(), 0);

    stop(server).await;
}

#[tokio::test]
async fn test_pending_requests_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };

    let (_, server) = start(config.clone()).await;
    assert_eq!(server.recovery().total, 0);
    server.submit(106, "ops@example.com", "later", 600_000).await.unwrap();
    server.submit(107, "GET http://h/p text/plain", "", 600_000).await.unwrap();
    stop(server).await;

    let (_, server) = start(config).await;
    let report = server.recovery();
    assert_eq!(report.total, 2);
    assert_eq!(report.scheduled, 2);
    assert_eq!(server.scheduler().pending_count(), 2);
    stop(server).await;
}

#[tokio::test]
async fn test_master_without_reachable_slave_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = DaemonConfig {
        mode: ClusterMode::Master,
        slaves: vec![addr],
        ..Default::default()
    };
    let deliverer = Arc::new(LogDeliverer::new());
    let err = Server::start(config, deliverer.clone(), deliverer)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DaemonError::Cluster(grandma_cluster::ClusterError::NoSlavesConnected)
    ));
}
