//! Shared fixtures for end-to-end pipeline tests: wires the real
//! `Aggregator` / `Dispatcher` / `RetryingSender` stack on top of
//! in-memory or disk-backed test doubles, rather than mocking any of
//! the crate under test.

use std::path::Path;
use std::sync::Arc;

use usage_agent_api::AppState;
use usage_agent_core::endpoint::DiskEndpoint;
use usage_agent_core::persistence::MemoryPersistence;
use usage_agent_core::{
    spawn_worker, Aggregator, Dispatcher, MetricSchema, MetricSchemaEntry, Persistence,
    RetryPolicy, RetryingSender, StatusTracker, ValueKind,
};

/// A fast retry policy so tests don't wait out the agent's real backoff
/// schedule.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: std::time::Duration::from_millis(5),
        max_delay: std::time::Duration::from_millis(20),
        multiplier: 2.0,
        max_lifetime: std::time::Duration::from_secs(2),
        jitter: 0.0,
    }
}

/// Build a full pipeline writing accepted batches out to `directory` via a
/// disk endpoint, returning the [`AppState`] for the HTTP router plus the
/// sender so tests can wait for delivery to land on disk.
pub async fn build_pipeline(directory: &Path) -> (AppState, Arc<RetryingSender>) {
    let schema = MetricSchema::new(vec![
        MetricSchemaEntry {
            name: "requests".to_string(),
            value_kind: ValueKind::Int64,
        },
        MetricSchemaEntry {
            name: "latency".to_string(),
            value_kind: ValueKind::Double,
        },
    ])
    .unwrap();

    let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
    let endpoint = Arc::new(DiskEndpoint::new("disk", directory.to_path_buf()));
    let sender = Arc::new(RetryingSender::new(
        endpoint,
        persistence.clone(),
        fast_retry_policy(),
    ));
    sender.recover().await.unwrap();
    spawn_worker(sender.clone());

    let status = Arc::new(StatusTracker::new());
    let dispatcher = Arc::new(Dispatcher::new(vec![sender.clone()], status.clone()));
    let aggregator = Arc::new(Aggregator::new(schema, persistence, dispatcher));
    aggregator.recover().await.unwrap();

    (AppState::new(aggregator, status), sender)
}

pub fn report_body(name: &str, value: serde_json::Value, start: &str, end: &str) -> String {
    serde_json::json!({
        "name": name,
        "value": value,
        "startTime": start,
        "endTime": end,
        "labels": {}
    })
    .to_string()
}
