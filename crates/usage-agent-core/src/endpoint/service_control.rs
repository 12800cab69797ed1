//! Service-control endpoint: reports usage to a cloud metering HTTP API.

use super::{new_report, Endpoint, EndpointReport, SendOutcome};
use crate::MetricBatch;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{info, warn};

/// Talks to a cloud metering API over HTTP.
///
/// Status code classification follows the convention used throughout this
/// codebase's HTTP error mapping: `2xx` is success, `429`/`5xx`/transport
/// errors are transient, and any other `4xx` is permanent (the request
/// itself is malformed or rejected and retrying unchanged will not help).
pub struct ServiceControlEndpoint {
    name: String,
    client: Client,
    report_url: String,
    operation_name: String,
}

impl ServiceControlEndpoint {
    pub fn new(name: impl Into<String>, report_url: impl Into<String>, operation_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: Client::new(),
            report_url: report_url.into(),
            operation_name: operation_name.into(),
        }
    }

    fn classify(status: StatusCode) -> SendOutcome {
        if status.is_success() {
            SendOutcome::Success
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            SendOutcome::TransientFailure(format!("remote returned {status}"))
        } else {
            SendOutcome::PermanentFailure(format!("remote returned {status}"))
        }
    }
}

#[async_trait]
impl Endpoint for ServiceControlEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_report(&self, batch: &MetricBatch) -> EndpointReport {
        let payload = serde_json::json!({
            "operationName": self.operation_name,
            "batchId": batch.batch_id,
            "reports": batch.reports,
        });
        new_report(batch.batch_id.clone(), payload)
    }

    async fn send(&self, report: &EndpointReport) -> SendOutcome {
        // The dedup id travels with every attempt so the remote side can
        // discard a retransmit it has already processed.
        let body = serde_json::json!({
            "reportId": report.dedup_id,
            "operation": report.payload,
        });

        let response = self
            .client
            .post(&self.report_url)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let outcome = Self::classify(status);
                if outcome.is_success() {
                    info!(endpoint = %self.name, dedup_id = %report.dedup_id, "report accepted by service-control endpoint");
                } else {
                    warn!(endpoint = %self.name, dedup_id = %report.dedup_id, status = %status, "service-control endpoint rejected report");
                }
                outcome
            }
            Err(e) => {
                warn!(endpoint = %self.name, error = %e, "transport error sending to service-control endpoint");
                SendOutcome::TransientFailure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
#[path = "service_control_tests.rs"]
mod tests;
