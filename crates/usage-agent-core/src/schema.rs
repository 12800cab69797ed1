//! # Metric Schema Module
//!
//! Defines the set of metrics the agent is configured to accept, and the
//! numeric kind each one carries. The [`Aggregator`](crate::aggregator::Aggregator)
//! consults this schema to reject reports for unknown metrics or reports
//! whose value kind doesn't match.

use crate::ValueKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry of the configured metric schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSchemaEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub value_kind: ValueKind,
}

/// The full set of `{name, valueType}` pairs the agent accepts.
///
/// Built once at startup from configuration and treated as immutable for
/// the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct MetricSchema {
    entries: HashMap<String, ValueKind>,
}

impl MetricSchema {
    /// Build a schema from configured entries.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DuplicateMetric`] if the same metric name
    /// appears twice.
    pub fn new(entries: Vec<MetricSchemaEntry>) -> Result<Self, SchemaError> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.insert(entry.name.clone(), entry.value_kind).is_some() {
                return Err(SchemaError::DuplicateMetric { name: entry.name });
            }
        }
        Ok(Self { entries: map })
    }

    /// Look up the configured value kind for a metric name, if known.
    pub fn value_kind_for(&self, name: &str) -> Option<ValueKind> {
        self.entries.get(name).copied()
    }

    /// Whether `name` is a configured metric.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// Errors building a [`MetricSchema`] from configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate metric name in schema: {name}")]
    DuplicateMetric { name: String },
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
