use super::*;
use std::collections::VecDeque;
use usage_agent_core::persistence::MemoryPersistence;
use usage_agent_core::{BatchId, EndpointReport, QueueEntry, RetryState, ScalarValue, Timestamp};

#[test]
fn build_endpoint_preserves_configured_name() {
    let disk = EndpointConfig::Disk {
        name: "disk".to_string(),
        directory: PathBuf::from("/tmp/usage-agent-test"),
    };
    assert_eq!(build_endpoint(&disk).name(), "disk");

    let service_control = EndpointConfig::ServiceControl {
        name: "cloud".to_string(),
        report_url: "https://example.invalid/report".to_string(),
        operation_name: "usage.report".to_string(),
    };
    assert_eq!(build_endpoint(&service_control).name(), "cloud");
}

async fn store_orphaned_queue(persistence: &MemoryPersistence, endpoint_name: &str) {
    let entry = QueueEntry {
        endpoint_report: EndpointReport {
            dedup_id: uuid::Uuid::new_v4(),
            batch_id: BatchId::new(),
            payload: serde_json::json!({"value": ScalarValue::Int64(1)}),
        },
        first_attempt: Timestamp::now(),
        next_attempt: Timestamp::now(),
        retry_state: RetryState::new(),
    };
    let queue: VecDeque<QueueEntry> = VecDeque::from([entry]);
    let blob = serde_json::to_vec(&queue).unwrap();
    persistence
        .store(&format!("sender/{endpoint_name}"), blob)
        .await
        .unwrap();
}

#[tokio::test]
async fn drain_orphaned_queues_forgets_keys_with_no_configured_endpoint() {
    let persistence = Arc::new(MemoryPersistence::new());
    store_orphaned_queue(&persistence, "removed-endpoint").await;

    let directory = tempfile::tempdir().unwrap();
    drain_orphaned_queues(
        persistence.clone(),
        &HashSet::new(),
        RetryPolicy::default(),
        directory.path().join("orphaned"),
    )
    .await
    .unwrap();

    let keys = persistence.keys().await.unwrap();
    assert!(!keys.contains(&"sender/removed-endpoint".to_string()));
}

#[tokio::test]
async fn drain_orphaned_queues_leaves_configured_endpoints_alone() {
    let persistence = Arc::new(MemoryPersistence::new());
    store_orphaned_queue(&persistence, "still-configured").await;

    let mut configured = HashSet::new();
    configured.insert("still-configured".to_string());

    let directory = tempfile::tempdir().unwrap();
    drain_orphaned_queues(
        persistence.clone(),
        &configured,
        RetryPolicy::default(),
        directory.path().join("orphaned"),
    )
    .await
    .unwrap();

    let keys = persistence.keys().await.unwrap();
    assert!(keys.contains(&"sender/still-configured".to_string()));
}
