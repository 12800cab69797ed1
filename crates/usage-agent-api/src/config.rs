//! Configuration schema for the usage-metering agent.
//!
//! Loaded with the `config` crate from TOML (primary), YAML or JSON, with
//! environment-variable overrides under a fixed prefix.
//! [`ServiceConfig::validate`] runs once at startup and turns every
//! structural problem into a descriptive [`ConfigError`] before the agent
//! ever binds a socket.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use usage_agent_core::{MetricSchema, MetricSchemaEntry, RetryPolicy, ValueKind};

/// Top-level service configuration, as loaded from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Enumerated metric names and their value kinds.
    pub metrics: Vec<MetricConfig>,

    /// One entry per remote endpoint this agent fans reports out to.
    pub endpoints: Vec<EndpointConfig>,

    /// Backoff parameters shared by every `RetryingSender`.
    pub retry: RetryConfig,

    /// Aggregation window, in seconds, between batch emissions.
    ///
    /// The aggregator has exactly one window-close timer, so
    /// `metrics[].buffer_seconds` is accepted for schema compatibility but
    /// does not override this value — see `DESIGN.md`.
    pub buffer_seconds: u64,

    /// Graceful shutdown timeout.
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

impl ServiceConfig {
    /// Validate the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found:
    /// duplicate metric or endpoint names, an unknown value kind, or a
    /// non-positive buffer/backoff duration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one metric must be configured".to_string(),
            });
        }

        let mut seen_metrics = HashSet::new();
        for metric in &self.metrics {
            if !seen_metrics.insert(metric.name.as_str()) {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate metric name '{}'", metric.name),
                });
            }
            if let Some(buffer) = metric.buffer_seconds {
                if buffer == 0 {
                    return Err(ConfigError::Invalid {
                        message: format!(
                            "metric '{}': buffer_seconds must be positive",
                            metric.name
                        ),
                    });
                }
            }
        }

        if self.buffer_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "buffer_seconds must be positive".to_string(),
            });
        }

        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one endpoint must be configured".to_string(),
            });
        }

        let mut seen_endpoints = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen_endpoints.insert(endpoint.name().to_string()) {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate endpoint name '{}'", endpoint.name()),
                });
            }
            endpoint.validate()?;
        }

        self.retry.validate()?;

        Ok(())
    }

    /// Build the [`MetricSchema`] the `Aggregator` consults.
    pub fn metric_schema(&self) -> Result<MetricSchema, ConfigError> {
        let entries = self
            .metrics
            .iter()
            .map(|m| MetricSchemaEntry {
                name: m.name.clone(),
                value_kind: m.value_kind,
            })
            .collect();
        MetricSchema::new(entries).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    /// The aggregation window as a [`Duration`].
    pub fn window_interval(&self) -> Duration {
        Duration::from_secs(self.buffer_seconds)
    }
}

/// One configured metric: its name and numeric kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub value_kind: ValueKind,

    /// Per-metric aggregation window override.
    ///
    /// Accepted for configuration-schema compatibility but currently
    /// informational only — see [`ServiceConfig::buffer_seconds`].
    #[serde(default)]
    pub buffer_seconds: Option<u64>,
}

/// One configured remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// Writes reports as JSON files into a local directory.
    Disk { name: String, directory: PathBuf },

    /// Reports usage to a cloud metering HTTP API.
    ServiceControl {
        name: String,
        report_url: String,
        operation_name: String,
    },
}

impl EndpointConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Disk { name, .. } => name,
            Self::ServiceControl { name, .. } => name,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name().is_empty() {
            return Err(ConfigError::Invalid {
                message: "endpoint name must not be empty".to_string(),
            });
        }

        match self {
            Self::Disk { directory, .. } => {
                if directory.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid {
                        message: format!("endpoint '{}': directory must not be empty", self.name()),
                    });
                }
            }
            Self::ServiceControl {
                report_url,
                operation_name,
                ..
            } => {
                if report_url.is_empty() {
                    return Err(ConfigError::Invalid {
                        message: format!("endpoint '{}': report_url must not be empty", self.name()),
                    });
                }
                if operation_name.is_empty() {
                    return Err(ConfigError::Invalid {
                        message: format!(
                            "endpoint '{}': operation_name must not be empty",
                            self.name()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Backoff parameters for every `RetryingSender`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub max_lifetime_seconds: u64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_jitter() -> f64 {
    0.25
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "retry.base_delay_seconds must be positive".to_string(),
            });
        }
        if self.max_delay_seconds < self.base_delay_seconds {
            return Err(ConfigError::Invalid {
                message: "retry.max_delay_seconds must be >= base_delay_seconds".to_string(),
            });
        }
        if self.multiplier <= 1.0 {
            return Err(ConfigError::Invalid {
                message: "retry.multiplier must be greater than 1.0".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "retry.max_attempts must be positive".to_string(),
            });
        }
        if self.max_lifetime_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "retry.max_lifetime_seconds must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid {
                message: "retry.jitter must be between 0.0 and 1.0".to_string(),
            });
        }
        Ok(())
    }

    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_seconds),
            max_delay: Duration::from_secs(self.max_delay_seconds),
            multiplier: self.multiplier,
            max_lifetime: Duration::from_secs(self.max_lifetime_seconds),
            jitter: self.jitter,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
