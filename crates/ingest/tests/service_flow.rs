use codefam_ingest::{
    read_health_snapshot, IngestError, IngestService, MemoryQueue, QueueItem, ServiceConfig,
    SpoolOptions, SpoolQueue,
};
use codefam_registry::{CheckpointStore, FamilyId, RegistryStats};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.checkpoint.dir = dir.to_path_buf();
    config.checkpoint.initial_backoff_ms = 1;
    config.workers = 4;
    config
}

fn item(text: &str, name: &str) -> QueueItem {
    QueueItem::new(text, json!({ "name": name, "chain": "mainnet" }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drained_queue_is_checkpointed_on_shutdown() {
    let temp = TempDir::new().expect("tempdir");
    let queue = Arc::new(MemoryQueue::closed_with([
        item("contract A{}", "A"),
        item("contract A{}", "A2"),
        item("contract A {}\n// redeployed", "A3"),
        item("contract B{}", "B"),
        item("   ", "blank"),
    ]));

    let service = IngestService::start(config(temp.path()), queue.clone())
        .await
        .expect("start");
    let report = service
        .run_until(std::future::pending())
        .await
        .expect("shutdown");

    assert_eq!(report.ingest.received, 5);
    assert_eq!(report.ingest.ingested, 5);
    assert_eq!(report.ingest.degenerate, 1);
    assert_eq!(report.checkpoint.families, 3);
    assert_eq!(report.checkpoint.samples, 5);
    assert_eq!(queue.in_flight_len(), 0);

    let snapshot = CheckpointStore::new(temp.path())
        .read()
        .await
        .expect("readable")
        .expect("checkpoint written");
    let stats = RegistryStats::from_snapshot(&snapshot);
    assert_eq!(stats.recurring_families, 1);
    let largest = stats.largest_family.expect("largest family");
    assert_eq!(largest.member_count, 3);
    assert_eq!(largest.labels, vec!["A", "A2", "A3"]);

    let health = read_health_snapshot(temp.path())
        .await
        .expect("health readable")
        .expect("health written");
    assert!(health.is_healthy());
    assert_eq!(health.families, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_resumes_from_checkpoint() {
    let temp = TempDir::new().expect("tempdir");

    let first = Arc::new(MemoryQueue::closed_with([
        item("contract A{}", "A"),
        item("contract B{}", "B"),
    ]));
    IngestService::start(config(temp.path()), first)
        .await
        .expect("start")
        .run_until(std::future::pending())
        .await
        .expect("first run");

    let second = Arc::new(MemoryQueue::closed_with([item("contract A{}", "again")]));
    let service = IngestService::start(config(temp.path()), second)
        .await
        .expect("restart");
    assert_eq!(service.registry().family_count(), 2);
    let report = service
        .run_until(std::future::pending())
        .await
        .expect("second run");
    assert_eq!(report.ingest.families_created, 0);

    let snapshot = CheckpointStore::new(temp.path())
        .read()
        .await
        .unwrap()
        .unwrap();
    let family_a = snapshot.family(FamilyId(0)).expect("family A");
    assert_eq!(family_a.member_count, 2);
    assert_eq!(snapshot.next_sample_id, 3);
}

#[tokio::test]
async fn second_service_on_same_directory_is_refused() {
    let temp = TempDir::new().expect("tempdir");
    let running = IngestService::start(config(temp.path()), Arc::new(MemoryQueue::new()))
        .await
        .expect("first start");

    let err = IngestService::start(config(temp.path()), Arc::new(MemoryQueue::new()))
        .await
        .err()
        .expect("second start must fail");
    assert!(matches!(err, IngestError::LockHeld { .. }), "{err}");

    running.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn corrupt_checkpoint_prevents_startup() {
    let temp = TempDir::new().expect("tempdir");
    tokio::fs::write(temp.path().join("registry.json"), b"[]")
        .await
        .unwrap();

    let err = IngestService::start(config(temp.path()), Arc::new(MemoryQueue::new()))
        .await
        .err()
        .expect("corrupt checkpoint must fail");
    match err {
        IngestError::RegistryError(inner) => assert!(inner.is_corrupt_checkpoint()),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spool_items_are_consumed_and_removed() {
    let temp = TempDir::new().expect("tempdir");
    let spool_dir = temp.path().join("spool");
    for i in 0..6 {
        let text = if i < 4 { "contract Proxy{}" } else { "contract Vault{}" };
        SpoolQueue::enqueue(&spool_dir, &item(text, "x"))
            .await
            .expect("enqueue");
    }

    let queue = Arc::new(
        SpoolQueue::open(
            &spool_dir,
            SpoolOptions {
                drain: true,
                ..Default::default()
            },
        )
        .await
        .expect("open spool"),
    );
    let service = IngestService::start(config(&temp.path().join("state")), queue.clone())
        .await
        .expect("start");
    let report = service
        .run_until(std::future::pending())
        .await
        .expect("shutdown");

    assert_eq!(report.ingest.ingested, 6);
    assert_eq!(report.checkpoint.families, 2);
    assert!(queue.pending().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_signal_closes_an_open_queue() {
    let temp = TempDir::new().expect("tempdir");
    let queue = Arc::new(MemoryQueue::new());
    queue.push(item("contract A{}", "A")).expect("push");

    let service = IngestService::start(config(temp.path()), queue.clone())
        .await
        .expect("start");
    let registry = Arc::clone(service.registry());
    let report = service
        .run_until(async move {
            while registry.sample_count() < 1 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("shutdown");

    assert_eq!(report.ingest.ingested, 1);
    assert_eq!(report.checkpoint.samples, 1);
    assert!(queue.push(item("contract B{}", "B")).is_err());
}
