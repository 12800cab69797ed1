//! # RetryingSender Module
//!
//! Wraps one [`Endpoint`] and owns a durable queue of [`EndpointReport`]s,
//! retrying transient failures with the backoff schedule from
//! [`crate::retry`] until the entry succeeds, is permanently rejected, or
//! exceeds its lifetime.

use crate::endpoint::{Endpoint, EndpointReport, SendOutcome};
use crate::persistence::Persistence;
use crate::retry::{RetryPolicy, RetryState};
use crate::{MetricBatch, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// One entry of a sender's durable queue.
///
/// `first_attempt` and `next_attempt` are preserved verbatim across
/// restarts so a process crash never resets the backoff clock and
/// triggers a thundering-herd retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub endpoint_report: EndpointReport,
    pub first_attempt: Timestamp,
    pub next_attempt: Timestamp,
    pub retry_state: RetryState,
}

impl QueueEntry {
    fn new(endpoint_report: EndpointReport) -> Self {
        let now = Timestamp::now();
        Self {
            endpoint_report,
            first_attempt: now,
            next_attempt: now,
            retry_state: RetryState::new(),
        }
    }

    fn lifetime_exceeded(&self, policy: &RetryPolicy) -> bool {
        Timestamp::now().duration_since(self.first_attempt) >= policy.max_lifetime
    }
}

/// Terminal outcome of delivering one batch to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Success,
    Failure,
}

/// Errors surfaced by [`RetryingSender`].
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("failed to persist queue for sender '{endpoint}': {source}")]
    PersistenceFailed {
        endpoint: String,
        #[source]
        source: crate::persistence::PersistenceError,
    },

    #[error("failed to decode persisted queue for sender '{endpoint}': {message}")]
    CorruptState { endpoint: String, message: String },
}

struct SenderState {
    queue: VecDeque<QueueEntry>,
    waiters: HashMap<String, oneshot::Sender<BatchOutcome>>,
}

/// Durable queue + backoff loop wrapping one [`Endpoint`].
pub struct RetryingSender {
    endpoint: Arc<dyn Endpoint>,
    persistence: Arc<dyn Persistence>,
    retry_policy: RetryPolicy,
    state: Mutex<SenderState>,
    shutdown_requested: AtomicBool,
    shutdown_notify: Notify,
}

impl RetryingSender {
    /// Construct a sender with an empty queue. Call [`RetryingSender::recover`]
    /// before starting the worker to rehydrate any persisted entries.
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        persistence: Arc<dyn Persistence>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            endpoint,
            persistence,
            retry_policy,
            state: Mutex::new(SenderState {
                queue: VecDeque::new(),
                waiters: HashMap::new(),
            }),
            shutdown_requested: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    fn persistence_key(&self) -> String {
        format!("sender/{}", self.endpoint.name())
    }

    /// Endpoint name this sender is wrapping, used by the Dispatcher for
    /// logging and by `App` wiring to discover orphaned queues.
    pub fn endpoint_name(&self) -> &str {
        self.endpoint.name()
    }

    /// Reload the persisted queue from disk, preserving `next_attempt`
    /// deadlines.
    #[instrument(skip(self), fields(endpoint = %self.endpoint.name()))]
    pub async fn recover(&self) -> Result<(), SenderError> {
        let key = self.persistence_key();
        let blob = self
            .persistence
            .load(&key)
            .await
            .map_err(|source| SenderError::PersistenceFailed {
                endpoint: self.endpoint.name().to_string(),
                source,
            })?;

        let Some(blob) = blob else {
            return Ok(());
        };

        let queue: VecDeque<QueueEntry> =
            serde_json::from_slice(&blob).map_err(|e| SenderError::CorruptState {
                endpoint: self.endpoint.name().to_string(),
                message: e.to_string(),
            })?;

        info!(count = queue.len(), "recovered sender queue from disk");
        let mut state = self.state.lock().await;
        state.queue = queue;
        Ok(())
    }

    /// Number of entries currently queued (pending + in flight).
    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Build this endpoint's report from `batch`, durably enqueue it, and
    /// return a receiver that resolves with the terminal outcome once the
    /// worker finishes with this entry.
    ///
    /// Fails only if persistence fails — the sender durability invariant
    /// requires the caller (the `Dispatcher`) to treat a failure here as
    /// fatal to the batch's acceptance.
    #[instrument(skip(self, batch), fields(endpoint = %self.endpoint.name(), batch_id = %batch.batch_id))]
    pub async fn enqueue(
        &self,
        batch: &MetricBatch,
    ) -> Result<oneshot::Receiver<BatchOutcome>, SenderError> {
        let report = self.endpoint.build_report(batch);
        let entry = QueueEntry::new(report);

        let mut state = self.state.lock().await;
        state.queue.push_back(entry);
        self.persist_locked(&state.queue).await?;

        let (tx, rx) = oneshot::channel();
        state.waiters.insert(batch.batch_id.to_string(), tx);
        debug!(queue_len = state.queue.len(), "enqueued endpoint report");
        Ok(rx)
    }

    async fn persist_locked(&self, queue: &VecDeque<QueueEntry>) -> Result<(), SenderError> {
        let blob = serde_json::to_vec(queue).expect("QueueEntry is always serializable");
        self.persistence
            .store(&self.persistence_key(), blob)
            .await
            .map_err(|source| SenderError::PersistenceFailed {
                endpoint: self.endpoint.name().to_string(),
                source,
            })
    }

    /// Remove this sender's persisted key entirely.
    ///
    /// Used once an orphaned sender (whose endpoint no longer appears in
    /// configuration) has drained its queue to completion.
    pub async fn forget(&self) -> Result<(), SenderError> {
        self.persistence
            .remove(&self.persistence_key())
            .await
            .map_err(|source| SenderError::PersistenceFailed {
                endpoint: self.endpoint.name().to_string(),
                source,
            })
    }

    /// Request the worker loop to stop without draining the queue. The
    /// queue remains durable on disk for the next process.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    /// Run the worker loop: wait for the queue head's `next_attempt`, call
    /// `send`, and advance the entry's state machine. Returns when shutdown
    /// is requested or the persistence layer starts failing.
    ///
    /// Entries are processed strictly in FIFO order; a delayed head is
    /// never leapfrogged by a later-enqueued entry.
    #[instrument(skip(self), fields(endpoint = %self.endpoint.name()))]
    pub async fn run(&self) {
        loop {
            if self.shutdown_requested.load(Ordering::SeqCst) {
                return;
            }

            let wait = {
                let state = self.state.lock().await;
                match state.queue.front() {
                    None => None,
                    Some(entry) => {
                        Some(entry.next_attempt.duration_since(Timestamp::now()))
                    }
                }
            };

            match wait {
                None => {
                    // Nothing queued; wait to be woken by `enqueue` or shutdown.
                    tokio::select! {
                        _ = self.shutdown_notify.notified() => {}
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                    }
                    continue;
                }
                Some(delay) if delay > std::time::Duration::ZERO => {
                    tokio::select! {
                        _ = self.shutdown_notify.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
                Some(_) => {}
            }

            if self.shutdown_requested.load(Ordering::SeqCst) {
                return;
            }

            self.process_head().await;
        }
    }

    async fn process_head(&self) {
        let entry = {
            let state = self.state.lock().await;
            state.queue.front().cloned()
        };
        let Some(entry) = entry else { return };

        let outcome = self.endpoint.send(&entry.endpoint_report).await;
        self.apply_outcome(entry, outcome).await;
    }

    async fn apply_outcome(&self, mut entry: QueueEntry, outcome: SendOutcome) {
        let batch_id = entry.endpoint_report.batch_id.to_string();

        let terminal = match outcome {
            SendOutcome::Success => Some(BatchOutcome::Success),
            SendOutcome::PermanentFailure(reason) => {
                warn!(batch_id = %batch_id, reason, "endpoint permanently rejected report");
                Some(BatchOutcome::Failure)
            }
            SendOutcome::TransientFailure(reason) => {
                if entry.lifetime_exceeded(&self.retry_policy) {
                    warn!(batch_id = %batch_id, reason, "entry exceeded max lifetime, giving up");
                    Some(BatchOutcome::Failure)
                } else {
                    // Compute the delay before this failure is recorded, so
                    // the first retry uses exponent 0 (`failure_count == 0`).
                    let delay = entry.retry_state.next_delay(&self.retry_policy);
                    entry.retry_state.record_failure();

                    if !entry.retry_state.can_retry(&self.retry_policy) {
                        warn!(batch_id = %batch_id, reason, "entry exceeded max attempts, giving up");
                        Some(BatchOutcome::Failure)
                    } else {
                        entry.next_attempt = Timestamp::now().add(delay);
                        debug!(batch_id = %batch_id, reason, next_attempt = %entry.next_attempt, "scheduling retry");
                        None
                    }
                }
            }
        };

        let mut state = self.state.lock().await;
        match terminal {
            Some(outcome) => {
                state.queue.pop_front();
                if self.persist_locked(&state.queue).await.is_err() {
                    warn!(batch_id = %batch_id, "failed to persist queue after removing terminal entry");
                }
                if let Some(waiter) = state.waiters.remove(&batch_id) {
                    let _ = waiter.send(outcome);
                }
            }
            None => {
                if let Some(head) = state.queue.front_mut() {
                    *head = entry;
                }
                if self.persist_locked(&state.queue).await.is_err() {
                    warn!(batch_id = %batch_id, "failed to persist queue after scheduling retry");
                }
            }
        }
    }
}

/// Spawn `sender`'s worker loop as a background task.
pub fn spawn_worker(sender: Arc<RetryingSender>) -> JoinHandle<()> {
    tokio::spawn(async move { sender.run().await })
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
