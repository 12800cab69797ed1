//! Disk endpoint: writes each report as a JSON file into a local
//! directory. Useful for testing and for operators who want a local audit
//! trail instead of (or alongside) a cloud metering service.

use super::{new_report, Endpoint, EndpointReport, SendOutcome};
use crate::MetricBatch;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Writes [`EndpointReport`]s to `<directory>/<dedup_id>.json`.
///
/// Always reports [`SendOutcome::Success`] unless the write itself fails,
/// in which case the failure is treated as transient — a full disk or a
/// permissions problem is exactly the kind of thing that might clear up
/// before the next retry.
#[derive(Debug, Clone)]
pub struct DiskEndpoint {
    name: String,
    directory: PathBuf,
}

impl DiskEndpoint {
    pub fn new(name: impl Into<String>, directory: PathBuf) -> Self {
        Self {
            name: name.into(),
            directory,
        }
    }
}

#[async_trait]
impl Endpoint for DiskEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_report(&self, batch: &MetricBatch) -> EndpointReport {
        let payload = serde_json::json!({
            "batch_id": batch.batch_id,
            "reports": batch.reports,
        });
        new_report(batch.batch_id.clone(), payload)
    }

    async fn send(&self, report: &EndpointReport) -> SendOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&self.directory).await {
            warn!(endpoint = %self.name, error = %e, "failed to create disk endpoint directory");
            return SendOutcome::TransientFailure(e.to_string());
        }

        let path = self.directory.join(format!("{}.json", report.dedup_id));
        let json = match serde_json::to_vec_pretty(report) {
            Ok(json) => json,
            Err(e) => {
                return SendOutcome::PermanentFailure(format!(
                    "failed to serialize report: {e}"
                ))
            }
        };

        let temp_path = path.with_extension("json.tmp");
        let result: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&json).await?;
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &path).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(endpoint = %self.name, path = %path.display(), "wrote report to disk endpoint");
                SendOutcome::Success
            }
            Err(e) => {
                warn!(endpoint = %self.name, error = %e, "failed to write report to disk endpoint");
                SendOutcome::TransientFailure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
#[path = "disk_tests.rs"]
mod tests;
