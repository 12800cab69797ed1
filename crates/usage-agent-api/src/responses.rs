//! Response bodies for the agent's HTTP surface.

use serde::Serialize;

/// `POST /report` success body.
#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub status: &'static str,
}

impl ReportResponse {
    pub fn accepted() -> Self {
        Self { status: "accepted" }
    }
}

/// `GET /healthz` body — a trivial liveness probe distinct from the
/// richer `/status` resource; never reflects pipeline state.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

#[cfg(test)]
#[path = "responses_tests.rs"]
mod tests;
