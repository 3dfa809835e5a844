//! Tests for coordinator reconciliation and worker lifecycle.

use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::pipe::create_fifo;

const SETTLE: Duration = Duration::from_millis(60);

async fn coordinator(root: &TempDir) -> Coordinator {
    let coordinator = Coordinator::new(Config::for_test(root.path()));
    coordinator.prepare().await.unwrap();
    coordinator
}

fn add_resource(c: &Coordinator, resource: &str) {
    create_fifo(&c.scanner().producer_path(resource)).unwrap();
}

fn add_consumer(c: &Coordinator, resource: &str, consumer: &str) {
    create_fifo(&c.scanner().consumer_path(resource, consumer)).unwrap();
}

/// Reconcile, let workers observe their signals, reconcile again to reap.
async fn settle(c: &mut Coordinator) {
    c.reconcile().await.unwrap();
    tokio::time::sleep(SETTLE).await;
    c.reconcile().await.unwrap();
}

#[tokio::test]
async fn test_new_resource_gets_output_dir_and_reader() {
    let root = TempDir::new().unwrap();
    let mut c = coordinator(&root).await;
    add_resource(&c, "r1");

    c.reconcile().await.unwrap();

    assert!(c.scanner().resource_dir("r1").is_dir());
    assert_eq!(c.snapshot(), Snapshot::from([("r1".to_string(), vec![])]));
    assert_eq!(c.active_workers(), 1);
}

#[tokio::test]
async fn test_consumers_get_writers() {
    let root = TempDir::new().unwrap();
    let mut c = coordinator(&root).await;
    add_resource(&c, "r1");
    c.reconcile().await.unwrap();

    add_consumer(&c, "r1", "c1");
    add_consumer(&c, "r1", "c2");
    c.reconcile().await.unwrap();

    assert_eq!(
        c.snapshot()["r1"],
        vec!["c1".to_string(), "c2".to_string()]
    );
    assert_eq!(c.active_workers(), 3);
}

#[tokio::test]
async fn test_removing_resource_stops_all_its_workers() {
    let root = TempDir::new().unwrap();
    let mut c = coordinator(&root).await;
    add_resource(&c, "r1");
    c.reconcile().await.unwrap();
    add_consumer(&c, "r1", "c1");
    add_consumer(&c, "r1", "c2");
    c.reconcile().await.unwrap();
    assert_eq!(c.active_workers(), 3);

    std::fs::remove_file(c.scanner().producer_path("r1")).unwrap();
    settle(&mut c).await;

    assert!(c.snapshot().is_empty());
    assert!(!c.registry().contains("r1"));
    assert_eq!(c.active_workers(), 0);
    // Consumer pipes belong to consumers and are left alone.
    assert!(c.scanner().consumer_path("r1", "c1").exists());
}

#[tokio::test]
async fn test_removing_one_consumer_leaves_siblings_running() {
    let root = TempDir::new().unwrap();
    let mut c = coordinator(&root).await;
    add_resource(&c, "r1");
    c.reconcile().await.unwrap();
    add_consumer(&c, "r1", "c1");
    add_consumer(&c, "r1", "c2");
    c.reconcile().await.unwrap();

    std::fs::remove_file(c.scanner().consumer_path("r1", "c1")).unwrap();
    settle(&mut c).await;

    assert_eq!(c.snapshot()["r1"], vec!["c2".to_string()]);
    assert_eq!(c.active_workers(), 2);
}

#[tokio::test]
async fn test_repeated_resource_detection_is_idempotent() {
    let root = TempDir::new().unwrap();
    let mut c = coordinator(&root).await;
    add_resource(&c, "r1");

    for _ in 0..5 {
        c.reconcile().await.unwrap();
    }

    assert_eq!(c.active_workers(), 1);
    assert_eq!(c.snapshot().len(), 1);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let root = TempDir::new().unwrap();
    let c = Coordinator::new(Config::for_test(root.path()));
    let shutdown = c.shutdown_token();

    let task = tokio::spawn(c.run());
    tokio::time::sleep(SETTLE).await;
    assert!(root.path().join("input").is_dir());
    assert!(root.path().join("output").is_dir());

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), task).await;
    assert!(result.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn test_run_fails_when_input_dir_disappears() {
    let root = TempDir::new().unwrap();
    let c = Coordinator::new(Config::for_test(root.path()));

    let task = tokio::spawn(c.run());
    tokio::time::sleep(SETTLE).await;
    std::fs::remove_dir_all(root.path().join("input")).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), task).await;
    let err = result.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, BroadcastError::List { .. }));
}
