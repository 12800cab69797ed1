//! # Usage-Agent Core
//!
//! Core business logic for the local usage-metering agent: aggregation,
//! fan-out dispatch, retrying delivery, and status tracking.
//!
//! ## Architecture
//!
//! The core follows the same clean-architecture shape as the webhook intake
//! system it was adapted from: business logic depends only on trait
//! abstractions (`Persistence`, `Endpoint`), and infrastructure
//! implementations (disk persistence, HTTP endpoints) are injected at
//! runtime by the service binary.
//!
//! ## Usage
//!
//! ```rust
//! use usage_agent_core::{MetricReport, ScalarValue, Timestamp};
//! use std::collections::HashMap;
//!
//! let report = MetricReport {
//!     name: "requests".to_string(),
//!     value: ScalarValue::Int64(5),
//!     start_time: Timestamp::now(),
//!     end_time: Timestamp::now(),
//!     labels: HashMap::new(),
//! };
//! assert_eq!(report.name, "requests");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Standard result type for usage-agent operations.
pub type UsageAgentResult<T> = Result<T, UsageAgentError>;

// ============================================================================
// Time
// ============================================================================

/// UTC timestamp with microsecond precision.
///
/// Thin wrapper around [`chrono::DateTime<Utc>`] so the rest of the crate
/// has a single, serializable notion of "instant" to work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to an RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get the underlying `DateTime`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add a duration to this timestamp.
    pub fn add(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 + chrono_duration)
    }

    /// Duration elapsed since `other` (zero if `other` is in the future).
    pub fn duration_since(&self, other: Self) -> Duration {
        self.0
            .signed_duration_since(other.0)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Data model (spec.md section 3)
// ============================================================================

/// A scalar metric value over the configured numeric kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ScalarValue {
    Int64(i64),
    Double(f64),
}

impl ScalarValue {
    /// The kind tag, used for schema matching and error messages.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int64(_) => ValueKind::Int64,
            Self::Double(_) => ValueKind::Double,
        }
    }

    /// Sum two values of the same kind.
    ///
    /// # Panics
    ///
    /// Panics if the kinds differ. Callers must have already checked
    /// [`ScalarValue::kind`] equality via the aggregator's schema check —
    /// by the time values reach the closure rule they are guaranteed
    /// homogeneous.
    pub fn add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Self::Int64(a + b),
            (Self::Double(a), Self::Double(b)) => Self::Double(a + b),
            _ => panic!("ScalarValue::add called on mismatched kinds"),
        }
    }
}

/// The configured numeric kind for a metric, from the configuration schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Int64,
    Double,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => write!(f, "int64"),
            Self::Double => write!(f, "double"),
        }
    }
}

/// A single usage observation with a half-open time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricReport {
    pub name: String,
    pub value: ScalarValue,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Stable identifier for a [`MetricBatch`], suitable as a dedup key.
///
/// Monotonically assigned at window close using a ULID so batch ids sort
/// lexicographically in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(String);

impl BatchId {
    /// Generate a fresh, monotonically-increasing batch id.
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of aggregated [`MetricReport`]s produced at window close.
///
/// No two entries share the same `(name, labels)` key (aggregation
/// closure, spec.md section 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub batch_id: BatchId,
    pub reports: Vec<MetricReport>,
}

impl MetricBatch {
    pub fn new(batch_id: BatchId, reports: Vec<MetricReport>) -> Self {
        Self { batch_id, reports }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Error type for string/timestamp parsing failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Error type for input validation failures.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },
}

/// Top-level error type for operations that don't have a more specific
/// error enum of their own.
#[derive(Debug, thiserror::Error)]
pub enum UsageAgentError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Metric schema configuration consumed by the aggregator.
pub mod schema;

/// Durable key-value persistence abstraction.
pub mod persistence;

/// Remote endpoint abstraction (`buildReport` / `send`).
pub mod endpoint;

/// Exponential backoff retry policy shared by every `RetryingSender`.
pub mod retry;

/// Per-endpoint durable queue + backoff loop.
pub mod sender;

/// Fan-out of one batch to every configured sender.
pub mod dispatcher;

/// Cross-endpoint success/failure snapshot for the `/status` resource.
pub mod status;

/// Report aggregation with ordering and non-overlap invariants.
pub mod aggregator;

pub use aggregator::{AcceptError, AcceptOutcome, Aggregator, WindowCloseError};
pub use dispatcher::{DispatchError, DispatchResult, Dispatcher};
pub use endpoint::{Endpoint, EndpointError, EndpointReport, SendOutcome};
pub use persistence::{Persistence, PersistenceError};
pub use retry::{RetryPolicy, RetryState};
pub use schema::{MetricSchema, MetricSchemaEntry, SchemaError};
pub use sender::{spawn_worker, BatchOutcome, QueueEntry, RetryingSender, SenderError};
pub use status::{StatusSnapshot, StatusTracker};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
