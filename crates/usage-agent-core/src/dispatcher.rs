//! # Dispatcher Module
//!
//! Fans one [`MetricBatch`] out to every configured [`RetryingSender`].
//!
//! `dispatch` has two distinct phases with different urgency: durably
//! enqueuing the batch on every sender gates the Aggregator's window
//! close and must complete before `dispatch` returns; waiting for each
//! sender's *terminal* outcome (success or dead, which can take up to a
//! sender's configured `maxLifetime`) must not block ingestion, so it
//! runs in a detached background task that reports into the
//! [`StatusTracker`] once every sender has settled.

use crate::sender::{BatchOutcome, RetryingSender};
use crate::status::StatusTracker;
use crate::{BatchId, MetricBatch};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Aggregate terminal outcome of dispatching one batch to every sender,
/// as folded into the [`StatusTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DispatchResult {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

impl DispatchResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_complete_failure(&self) -> bool {
        self.successful.is_empty() && !self.failed.is_empty()
    }

    pub fn is_no_op(&self) -> bool {
        self.successful.is_empty() && self.failed.is_empty()
    }
}

/// Errors surfaced while durably enqueuing a batch onto every sender.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to durably enqueue batch onto sender '{endpoint}': {source}")]
    EnqueueFailed {
        endpoint: String,
        #[source]
        source: crate::sender::SenderError,
    },
}

/// Fans out batches to every configured [`RetryingSender`].
///
/// Each sender owns its own durable queue and backoff loop; the
/// dispatcher's job is purely to hand a batch to all of them, gate on
/// durability, and — eventually, off the critical path — fold their
/// terminal outcomes into the injected [`StatusTracker`].
pub struct Dispatcher {
    senders: Vec<Arc<RetryingSender>>,
    status: Arc<StatusTracker>,
}

impl Dispatcher {
    pub fn new(senders: Vec<Arc<RetryingSender>>, status: Arc<StatusTracker>) -> Self {
        Self { senders, status }
    }

    pub fn senders(&self) -> &[Arc<RetryingSender>] {
        &self.senders
    }

    /// Durably enqueue `batch` onto every configured sender.
    ///
    /// Returns once every sender has persisted its `EndpointReport` —
    /// "batch accepted into the pipeline". A detached task then waits for
    /// each sender to reach a terminal outcome and
    /// reports the aggregate result to the `StatusTracker`; that settling
    /// is not awaited here.
    #[instrument(skip(self, batch), fields(batch_id = %batch.batch_id, senders = self.senders.len()))]
    pub async fn dispatch(&self, batch: &MetricBatch) -> Result<(), DispatchError> {
        if self.senders.is_empty() {
            return Ok(());
        }

        let mut receivers = Vec::with_capacity(self.senders.len());
        for sender in &self.senders {
            let rx = sender
                .enqueue(batch)
                .await
                .map_err(|source| DispatchError::EnqueueFailed {
                    endpoint: sender.endpoint_name().to_string(),
                    source,
                })?;
            receivers.push((sender.endpoint_name().to_string(), rx));
        }

        let status = self.status.clone();
        let batch_id = batch.batch_id.clone();
        tokio::spawn(Self::await_terminal_outcomes(batch_id, receivers, status));

        Ok(())
    }

    async fn await_terminal_outcomes(
        batch_id: BatchId,
        receivers: Vec<(String, tokio::sync::oneshot::Receiver<BatchOutcome>)>,
        status: Arc<StatusTracker>,
    ) {
        let mut result = DispatchResult::default();
        for (endpoint_name, rx) in receivers {
            match rx.await {
                Ok(BatchOutcome::Success) => result.successful.push(endpoint_name),
                Ok(BatchOutcome::Failure) => result.failed.push(endpoint_name),
                Err(_) => {
                    warn!(batch_id = %batch_id, endpoint = %endpoint_name, "sender dropped outcome channel without resolving");
                    result.failed.push(endpoint_name);
                }
            }
        }

        debug!(batch_id = %batch_id, successful = result.successful.len(), failed = result.failed.len(), "batch reached terminal state at every sender");
        status.record_dispatch_result(&result);
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
