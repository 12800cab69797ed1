//! HTTP error mapping for the agent's ingestion surface.
//!
//! A JSON body of `{"error": ..., "status": ..., "timestamp": ...}`, with
//! detailed failures logged server-side and a stable, client-safe message
//! returned in the body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;
use usage_agent_core::{AcceptError, WindowCloseError};

/// Errors the `/report` handler can surface to a client.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Accept(#[from] AcceptError),

    #[error("the agent is shutting down")]
    ShuttingDown,
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Accept(AcceptError::UnknownMetric { .. })
            | Self::Accept(AcceptError::TypeMismatch { .. })
            | Self::Accept(AcceptError::InvalidRange) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Self::Accept(AcceptError::OverlappingWindow) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            Self::Accept(AcceptError::PersistenceFailed { source }) => {
                error!(error = %source, "failed to persist aggregator state");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to durably record report".to_string(),
                )
            }
            Self::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        };

        error_response(status, message)
    }
}

/// Surfaced only by the background window-close timer, not an HTTP
/// handler — logged rather than returned, since no client request is
/// waiting on it.
pub fn log_window_close_failure(error: &WindowCloseError) {
    error!(error = %error, "window close failed");
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({
        "error": message,
        "status": status.as_u16(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
