use super::*;
use crate::endpoint::new_report;
use crate::persistence::MemoryPersistence;
use crate::sender::spawn_worker;
use crate::status::StatusTracker;
use crate::{BatchId, Endpoint, EndpointReport, MetricReport, Persistence, RetryPolicy, ScalarValue, SendOutcome, Timestamp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

struct ScriptedEndpoint {
    name: String,
    outcome: SendOutcome,
}

#[async_trait]
impl Endpoint for ScriptedEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_report(&self, batch: &MetricBatch) -> EndpointReport {
        new_report(batch.batch_id.clone(), serde_json::json!({}))
    }

    async fn send(&self, _report: &EndpointReport) -> SendOutcome {
        self.outcome.clone()
    }
}

fn sample_batch() -> MetricBatch {
    MetricBatch::new(
        BatchId::new(),
        vec![MetricReport {
            name: "requests".to_string(),
            value: ScalarValue::Int64(1),
            start_time: Timestamp::now(),
            end_time: Timestamp::now(),
            labels: HashMap::new(),
        }],
    )
}

fn make_sender(name: &str, outcome: SendOutcome) -> Arc<RetryingSender> {
    let endpoint: Arc<dyn Endpoint> = Arc::new(ScriptedEndpoint {
        name: name.to_string(),
        outcome,
    });
    let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
    Arc::new(RetryingSender::new(
        endpoint,
        persistence,
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::new(2, Duration::from_millis(5), Duration::from_millis(20), 2.0)
        },
    ))
}

async fn wait_for<F: Fn() -> bool>(predicate: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition did not become true in time");
}

#[tokio::test]
async fn dispatch_returns_once_every_sender_has_durably_enqueued() {
    let a = make_sender("disk", SendOutcome::Success);
    let b = make_sender("service-control", SendOutcome::Success);
    let status = Arc::new(StatusTracker::new());
    let dispatcher = Dispatcher::new(vec![a.clone(), b.clone()], status.clone());

    dispatcher.dispatch(&sample_batch()).await.unwrap();
    assert_eq!(a.queue_len().await, 1);
    assert_eq!(b.queue_len().await, 1);
}

#[tokio::test]
async fn dispatch_eventually_reports_overall_success_to_status() {
    let a = make_sender("disk", SendOutcome::Success);
    let b = make_sender("service-control", SendOutcome::Success);
    let status = Arc::new(StatusTracker::new());
    let dispatcher = Dispatcher::new(vec![a.clone(), b.clone()], status.clone());

    let worker_a = spawn_worker(a.clone());
    let worker_b = spawn_worker(b.clone());

    dispatcher.dispatch(&sample_batch()).await.unwrap();
    wait_for(|| status.snapshot().last_report_success.is_some()).await;

    let snapshot = status.snapshot();
    assert!(snapshot.last_report_success.is_some());
    assert_eq!(snapshot.current_failure_count, 0);

    a.request_shutdown();
    b.request_shutdown();
    let _ = tokio::join!(worker_a, worker_b);
}

#[tokio::test]
async fn dispatch_reports_overall_failure_when_one_sender_gives_up() {
    let a = make_sender("disk", SendOutcome::Success);
    let b = make_sender(
        "service-control",
        SendOutcome::PermanentFailure("rejected".to_string()),
    );
    let status = Arc::new(StatusTracker::new());
    let dispatcher = Dispatcher::new(vec![a.clone(), b.clone()], status.clone());

    let worker_a = spawn_worker(a.clone());
    let worker_b = spawn_worker(b.clone());

    dispatcher.dispatch(&sample_batch()).await.unwrap();
    wait_for(|| status.snapshot().current_failure_count > 0).await;

    let snapshot = status.snapshot();
    assert_eq!(snapshot.current_failure_count, 1);
    assert!(snapshot.last_report_success.is_none());

    a.request_shutdown();
    b.request_shutdown();
    let _ = tokio::join!(worker_a, worker_b);
}

#[tokio::test]
async fn dispatch_with_no_senders_is_a_no_op() {
    let status = Arc::new(StatusTracker::new());
    let dispatcher = Dispatcher::new(vec![], status.clone());
    dispatcher.dispatch(&sample_batch()).await.unwrap();
    assert!(status.snapshot().last_report_success.is_none());
    assert_eq!(status.snapshot().total_failure_count, 0);
}
