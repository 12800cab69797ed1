//! # Endpoint Module
//!
//! A remote metering service the agent fans reports out to. See spec
//! section 4.2. Endpoints are polymorphic over a small capability set —
//! the retry/queue machinery in [`crate::sender`] is endpoint-agnostic.

use crate::{BatchId, MetricBatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod disk;
mod service_control;

pub use disk::DiskEndpoint;
pub use service_control::ServiceControlEndpoint;

/// An opaque, endpoint-specific payload built from a [`MetricBatch`].
///
/// Carries a dedup id that the remote service uses to discard duplicates
/// caused by sender retries. The dedup id is allocated once by
/// [`Endpoint::build_report`] and never changes across retries (spec
/// section 3, "Batch-id stability").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointReport {
    /// Stable identifier the remote service can use to dedup retransmits.
    pub dedup_id: Uuid,

    /// The batch this report was derived from, retained for diagnostics.
    pub batch_id: BatchId,

    /// The endpoint-specific serialized payload.
    pub payload: serde_json::Value,
}

/// Outcome of one [`Endpoint::send`] attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The remote service accepted the report.
    Success,
    /// A retryable failure (network error, 5xx, throttling).
    TransientFailure(String),
    /// A failure that will not succeed on retry (e.g. schema rejection).
    PermanentFailure(String),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, Self::PermanentFailure(_))
    }
}

/// A remote metering service.
///
/// Implementations must be deterministic in dedup-id allocation: the id is
/// generated once in [`build_report`](Endpoint::build_report) and fixed
/// into the resulting [`EndpointReport`], so later retries of the same
/// entry reuse it rather than minting a new one.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Symbolic name used in logs and as the persistence namespace for
    /// this endpoint's [`RetryingSender`](crate::sender::RetryingSender).
    fn name(&self) -> &str;

    /// Build this endpoint's report from a batch.
    ///
    /// Pure aside from dedup-id allocation: calling this twice with the
    /// same batch produces two reports with different dedup ids. Callers
    /// (the `RetryingSender`) call this exactly once per batch and persist
    /// the result, so the id is fixed for the entry's lifetime.
    fn build_report(&self, batch: &MetricBatch) -> EndpointReport;

    /// Send a previously built report to the remote service.
    async fn send(&self, report: &EndpointReport) -> SendOutcome;
}

/// Allocate a fresh dedup id and wrap `payload` into an [`EndpointReport`].
///
/// Shared by endpoint implementations so the dedup-id allocation policy
/// (a random UUID, fixed at build time) lives in one place.
pub(crate) fn new_report(batch_id: BatchId, payload: serde_json::Value) -> EndpointReport {
    EndpointReport {
        dedup_id: Uuid::new_v4(),
        batch_id,
        payload,
    }
}

/// Errors constructing or configuring an [`Endpoint`].
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid endpoint configuration for '{name}': {message}")]
    InvalidConfig { name: String, message: String },
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
