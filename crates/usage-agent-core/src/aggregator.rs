//! # Aggregator Module
//!
//! Coalesces incoming [`MetricReport`]s into buckets keyed by
//! `(name, normalized labels)`, enforcing the time-monotonicity and
//! non-overlap invariants that make at-least-once client retries safe,
//! and emits a [`MetricBatch`] per window close. The richest-invariant
//! component in the pipeline.

use crate::dispatcher::Dispatcher;
use crate::persistence::Persistence;
use crate::schema::MetricSchema;
use crate::{BatchId, MetricBatch, MetricReport, Timestamp, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

const PERSISTENCE_KEY: &str = "aggregator";

/// Bucket identity: a metric name plus its labels, order-normalized so
/// two reports with the same labels in different insertion order land in
/// the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct BucketKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl BucketKey {
    fn new(name: &str, labels: &HashMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            labels: labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// On-disk representation of the aggregator's full state. A plain struct
/// rather than the in-memory `HashMap`s directly, since JSON object keys
/// must be strings and a `BucketKey` is not one.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AggregatorSnapshot {
    buckets: Vec<(BucketKey, MetricReport)>,
    last_accepted_end_time: Vec<(BucketKey, Timestamp)>,
}

struct AggregatorState {
    /// In-progress aggregate per bucket. Cleared at every window close.
    buckets: HashMap<BucketKey, MetricReport>,
    /// Survives window close — required to keep enforcing time
    /// monotonicity for a bucket even after its batch has shipped.
    last_accepted_end_time: HashMap<BucketKey, Timestamp>,
}

impl AggregatorState {
    fn to_snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            buckets: self
                .buckets
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            last_accepted_end_time: self
                .last_accepted_end_time
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    fn from_snapshot(snapshot: AggregatorSnapshot) -> Self {
        Self {
            buckets: snapshot.buckets.into_iter().collect(),
            last_accepted_end_time: snapshot.last_accepted_end_time.into_iter().collect(),
        }
    }
}

/// Outcome of a successfully accepted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
}

/// Rejection reasons and failure modes for [`Aggregator::accept`].
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("unknown metric '{name}'")]
    UnknownMetric { name: String },

    #[error("metric '{name}' expects {expected} but got {actual}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("report end_time is before its start_time")]
    InvalidRange,

    #[error("report overlaps the previously accepted window for this bucket")]
    OverlappingWindow,

    #[error("failed to persist aggregator state: {source}")]
    PersistenceFailed {
        #[source]
        source: crate::persistence::PersistenceError,
    },
}

/// Errors closing a window and handing the batch to the Dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum WindowCloseError {
    #[error("failed to durably dispatch batch: {source}")]
    DispatchFailed {
        #[source]
        source: crate::dispatcher::DispatchError,
    },

    #[error("failed to persist aggregator state after window close: {source}")]
    PersistenceFailed {
        #[source]
        source: crate::persistence::PersistenceError,
    },
}

/// Coalesces reports and emits batches.
///
/// All `accept` calls and window closes serialize on one async mutex;
/// persistence is performed while holding it, which is acceptable because
/// writes are small and infrequent relative to the aggregation window.
pub struct Aggregator {
    schema: MetricSchema,
    persistence: Arc<dyn Persistence>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    pub fn new(schema: MetricSchema, persistence: Arc<dyn Persistence>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            schema,
            persistence,
            dispatcher,
            state: Mutex::new(AggregatorState {
                buckets: HashMap::new(),
                last_accepted_end_time: HashMap::new(),
            }),
        }
    }

    /// Rehydrate in-memory state from persistence. Both the in-progress
    /// buckets and every bucket's `lastAcceptedEndTime` survive a restart.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<(), AcceptError> {
        let blob = self
            .persistence
            .load(PERSISTENCE_KEY)
            .await
            .map_err(|source| AcceptError::PersistenceFailed { source })?;

        let Some(blob) = blob else {
            return Ok(());
        };

        let snapshot: AggregatorSnapshot = serde_json::from_slice(&blob).unwrap_or_else(|e| {
            warn!(error = %e, "discarding unreadable aggregator snapshot");
            AggregatorSnapshot::default()
        });

        let mut state = self.state.lock().await;
        *state = AggregatorState::from_snapshot(snapshot);
        info!(buckets = state.buckets.len(), "recovered aggregator state from disk");
        Ok(())
    }

    /// Validate and fold `report` into its bucket under the closure rule,
    /// then persist the full state before returning.
    #[instrument(skip(self, report), fields(name = %report.name))]
    pub async fn accept(&self, report: MetricReport) -> Result<AcceptOutcome, AcceptError> {
        let configured_kind =
            self.schema
                .value_kind_for(&report.name)
                .ok_or_else(|| AcceptError::UnknownMetric {
                    name: report.name.clone(),
                })?;

        let actual_kind = report.value.kind();
        if actual_kind != configured_kind {
            return Err(AcceptError::TypeMismatch {
                name: report.name.clone(),
                expected: configured_kind,
                actual: actual_kind,
            });
        }

        if report.end_time < report.start_time {
            return Err(AcceptError::InvalidRange);
        }

        let key = BucketKey::new(&report.name, &report.labels);

        let mut state = self.state.lock().await;

        if let Some(last_end) = state.last_accepted_end_time.get(&key) {
            if report.start_time < *last_end {
                return Err(AcceptError::OverlappingWindow);
            }
        }

        let new_end = state
            .last_accepted_end_time
            .get(&key)
            .map(|prev| (*prev).max(report.end_time))
            .unwrap_or(report.end_time);

        let new_bucket_value = match state.buckets.get(&key) {
            Some(existing) => combine(existing.clone(), report),
            None => report,
        };

        // Compute the would-be next state without mutating `state` yet, so a
        // persistence failure below leaves in-memory state untouched and the
        // client's retry of the same report is accepted cleanly rather than
        // rejected as overlapping.
        let mut next_buckets = state.buckets.clone();
        next_buckets.insert(key.clone(), new_bucket_value);
        let mut next_last_accepted_end_time = state.last_accepted_end_time.clone();
        next_last_accepted_end_time.insert(key, new_end);

        let snapshot = AggregatorSnapshot {
            buckets: next_buckets.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            last_accepted_end_time: next_last_accepted_end_time
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        };
        self.persist(&snapshot)
            .await
            .map_err(|source| AcceptError::PersistenceFailed { source })?;

        state.buckets = next_buckets;
        state.last_accepted_end_time = next_last_accepted_end_time;

        Ok(AcceptOutcome::Accepted)
    }

    /// Form a batch from the current buckets, hand it to the Dispatcher,
    /// and clear the in-progress state once the Dispatcher confirms
    /// durable enqueue everywhere. `lastAcceptedEndTime` is never cleared
    /// here — only the in-progress aggregates are.
    ///
    /// If dispatch fails, the buckets are retained untouched so the next
    /// window attempts the same (now larger) batch again.
    #[instrument(skip(self))]
    pub async fn close_window(&self) -> Result<Option<BatchId>, WindowCloseError> {
        let mut state = self.state.lock().await;
        if state.buckets.is_empty() {
            return Ok(None);
        }

        let batch_id = BatchId::new();
        let reports: Vec<MetricReport> = state.buckets.values().cloned().collect();
        let batch = MetricBatch::new(batch_id.clone(), reports);

        self.dispatcher
            .dispatch(&batch)
            .await
            .map_err(|source| WindowCloseError::DispatchFailed { source })?;

        state.buckets.clear();
        let snapshot = state.to_snapshot();
        self.persist(&snapshot)
            .await
            .map_err(|source| WindowCloseError::PersistenceFailed { source })?;

        info!(batch_id = %batch_id, reports = batch.reports.len(), "window closed");
        Ok(Some(batch_id))
    }

    async fn persist(&self, snapshot: &AggregatorSnapshot) -> Result<(), crate::persistence::PersistenceError> {
        let blob = serde_json::to_vec(snapshot).expect("AggregatorSnapshot is always serializable");
        self.persistence.store(PERSISTENCE_KEY, blob).await
    }
}

/// Combine two reports sharing a bucket key under the aggregation closure
/// rule: summed value, widened time range, labels kept.
fn combine(a: MetricReport, b: MetricReport) -> MetricReport {
    MetricReport {
        name: a.name,
        value: a.value.add(b.value),
        start_time: a.start_time.min(b.start_time),
        end_time: a.end_time.max(b.end_time),
        labels: a.labels,
    }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
