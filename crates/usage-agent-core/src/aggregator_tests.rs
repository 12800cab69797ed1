use super::*;
use crate::endpoint::new_report;
use crate::persistence::MemoryPersistence;
use crate::status::StatusTracker;
use crate::{Endpoint, EndpointReport, MetricSchemaEntry, RetryPolicy, RetryingSender, ScalarValue, SendOutcome};
use async_trait::async_trait;
use std::time::Duration;

struct AlwaysSucceeds;

#[async_trait]
impl Endpoint for AlwaysSucceeds {
    fn name(&self) -> &str {
        "disk"
    }

    fn build_report(&self, batch: &MetricBatch) -> EndpointReport {
        new_report(batch.batch_id.clone(), serde_json::json!({}))
    }

    async fn send(&self, _report: &EndpointReport) -> SendOutcome {
        SendOutcome::Success
    }
}

struct FailingPersistence;

#[async_trait]
impl Persistence for FailingPersistence {
    async fn load(&self, _key: &str) -> Result<Option<Vec<u8>>, crate::persistence::PersistenceError> {
        Ok(None)
    }

    async fn store(&self, key: &str, _blob: Vec<u8>) -> Result<(), crate::persistence::PersistenceError> {
        Err(crate::persistence::PersistenceError::Io {
            key: key.to_string(),
            source: std::io::Error::other("disk full"),
        })
    }

    async fn remove(&self, _key: &str) -> Result<(), crate::persistence::PersistenceError> {
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, crate::persistence::PersistenceError> {
        Ok(vec![])
    }
}

fn schema() -> MetricSchema {
    MetricSchema::new(vec![MetricSchemaEntry {
        name: "requests".to_string(),
        value_kind: ValueKind::Int64,
    }])
    .unwrap()
}

fn report(name: &str, value: i64, start: i64, end: i64) -> MetricReport {
    MetricReport {
        name: name.to_string(),
        value: ScalarValue::Int64(value),
        start_time: at(start),
        end_time: at(end),
        labels: HashMap::new(),
    }
}

fn labeled_report(name: &str, value: i64, start: i64, end: i64, label: (&str, &str)) -> MetricReport {
    let mut labels = HashMap::new();
    labels.insert(label.0.to_string(), label.1.to_string());
    MetricReport {
        name: name.to_string(),
        value: ScalarValue::Int64(value),
        start_time: at(start),
        end_time: at(end),
        labels,
    }
}

fn at(epoch_seconds: i64) -> Timestamp {
    Timestamp::from_rfc3339(&format!(
        "2026-01-01T00:00:{:02}Z",
        epoch_seconds
    ))
    .unwrap()
}

fn working_dispatcher() -> Arc<Dispatcher> {
    let endpoint: Arc<dyn Endpoint> = Arc::new(AlwaysSucceeds);
    let sender = Arc::new(RetryingSender::new(
        endpoint,
        Arc::new(MemoryPersistence::new()),
        RetryPolicy::default(),
    ));
    Arc::new(Dispatcher::new(vec![sender], Arc::new(StatusTracker::new())))
}

fn failing_dispatcher() -> Arc<Dispatcher> {
    let endpoint: Arc<dyn Endpoint> = Arc::new(AlwaysSucceeds);
    let sender = Arc::new(RetryingSender::new(
        endpoint,
        Arc::new(FailingPersistence),
        RetryPolicy::default(),
    ));
    Arc::new(Dispatcher::new(vec![sender], Arc::new(StatusTracker::new())))
}

#[tokio::test]
async fn basic_aggregation_combines_reports_in_one_window() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), working_dispatcher());

    aggregator.accept(report("requests", 5, 0, 1)).await.unwrap();
    aggregator.accept(report("requests", 7, 1, 2)).await.unwrap();

    let batch_id = aggregator.close_window().await.unwrap();
    assert!(batch_id.is_some());
}

#[tokio::test]
async fn label_split_produces_two_bucket_entries() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), working_dispatcher());

    aggregator
        .accept(labeled_report("requests", 1, 0, 1, ("region", "us")))
        .await
        .unwrap();
    aggregator
        .accept(labeled_report("requests", 2, 0, 1, ("region", "eu")))
        .await
        .unwrap();

    let state = aggregator.state.lock().await;
    assert_eq!(state.buckets.len(), 2);
}

#[tokio::test]
async fn overlapping_window_is_rejected_without_mutating_state() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), working_dispatcher());

    aggregator.accept(report("requests", 1, 0, 2)).await.unwrap();
    let before = aggregator.state.lock().await.buckets.clone();

    let err = aggregator.accept(report("requests", 1, 1, 3)).await.unwrap_err();
    assert!(matches!(err, AcceptError::OverlappingWindow));

    let after = aggregator.state.lock().await.buckets.clone();
    assert_eq!(before.len(), after.len());
    for (key, value) in &before {
        assert_eq!(after.get(key), Some(value));
    }
}

#[tokio::test]
async fn unknown_metric_is_rejected() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), working_dispatcher());
    let err = aggregator.accept(report("bogus", 1, 0, 1)).await.unwrap_err();
    assert!(matches!(err, AcceptError::UnknownMetric { .. }));
}

#[tokio::test]
async fn type_mismatch_is_rejected() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), working_dispatcher());
    let mut bad = report("requests", 0, 0, 1);
    bad.value = ScalarValue::Double(1.5);
    let err = aggregator.accept(bad).await.unwrap_err();
    assert!(matches!(err, AcceptError::TypeMismatch { .. }));
}

#[tokio::test]
async fn invalid_range_is_rejected() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), working_dispatcher());
    let err = aggregator.accept(report("requests", 1, 5, 2)).await.unwrap_err();
    assert!(matches!(err, AcceptError::InvalidRange));
}

#[tokio::test]
async fn window_close_with_no_buckets_is_a_no_op() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), working_dispatcher());
    assert_eq!(aggregator.close_window().await.unwrap(), None);
}

#[tokio::test]
async fn window_close_clears_buckets_but_last_accepted_end_time_survives() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), working_dispatcher());
    aggregator.accept(report("requests", 1, 0, 2)).await.unwrap();
    aggregator.close_window().await.unwrap();

    {
        let state = aggregator.state.lock().await;
        assert!(state.buckets.is_empty());
        assert_eq!(state.last_accepted_end_time.len(), 1);
    }

    let err = aggregator.accept(report("requests", 1, 1, 3)).await.unwrap_err();
    assert!(matches!(err, AcceptError::OverlappingWindow));
}

#[tokio::test]
async fn dispatch_failure_retains_buckets_for_the_next_attempt() {
    let aggregator = Aggregator::new(schema(), Arc::new(MemoryPersistence::new()), failing_dispatcher());
    aggregator.accept(report("requests", 1, 0, 2)).await.unwrap();

    let err = aggregator.close_window().await.unwrap_err();
    assert!(matches!(err, WindowCloseError::DispatchFailed { .. }));

    let state = aggregator.state.lock().await;
    assert_eq!(state.buckets.len(), 1);
}

#[tokio::test]
async fn recover_reloads_buckets_and_last_accepted_end_time() {
    let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
    let aggregator = Aggregator::new(schema(), persistence.clone(), working_dispatcher());
    aggregator.accept(report("requests", 1, 0, 2)).await.unwrap();

    let reloaded = Aggregator::new(schema(), persistence, working_dispatcher());
    reloaded.recover().await.unwrap();

    let state = reloaded.state.lock().await;
    assert_eq!(state.buckets.len(), 1);
    assert_eq!(state.last_accepted_end_time.len(), 1);
}
