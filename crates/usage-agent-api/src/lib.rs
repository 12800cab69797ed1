//! # Usage-Agent API
//!
//! The agent's local HTTP surface: `POST /report`, `GET /status`, and
//! `GET /healthz`. Thin adapters over
//! [`usage_agent_core::Aggregator`] and [`usage_agent_core::StatusTracker`] —
//! all pipeline logic lives in `usage-agent-core`.

pub mod config;
pub mod config_loader;
pub mod errors;
pub mod responses;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use axum::http::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::instrument;
use usage_agent_core::{Aggregator, MetricReport, StatusSnapshot, StatusTracker};

pub use config::{ConfigError, EndpointConfig, LoggingConfig, MetricConfig, RetryConfig, ServiceConfig};
pub use config_loader::load as load_config;
pub use errors::{log_window_close_failure, ReportError};
pub use responses::{HealthResponse, ReportResponse};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub status: Arc<StatusTracker>,

    /// Flipped once graceful shutdown begins; `/report` returns `503`
    /// rather than accepting reports the pipeline is about to tear down
    /// during graceful shutdown.
    pub shutting_down: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>, status: Arc<StatusTracker>) -> Self {
        Self {
            aggregator,
            status,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the agent as shutting down; subsequent `/report` calls are
    /// rejected with `503` rather than being queued behind a pipeline that
    /// is about to stop.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

/// Build the axum [`Router`] for the agent's HTTP surface.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/report", post(handle_report))
        .route("/status", get(handle_status))
        .route("/healthz", get(handle_healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `POST /report` — accept one [`MetricReport`] into the aggregator.
#[instrument(skip(state, report), fields(metric = %report.name))]
async fn handle_report(
    State(state): State<AppState>,
    Json(report): Json<MetricReport>,
) -> Result<Json<ReportResponse>, ReportError> {
    if state.shutting_down.load(Ordering::SeqCst) {
        return Err(ReportError::ShuttingDown);
    }

    state.aggregator.accept(report).await?;
    Ok(Json(ReportResponse::accepted()))
}

/// `GET /status` — the cross-endpoint delivery snapshot.
#[instrument(skip(state))]
async fn handle_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot())
}

/// `GET /healthz` — trivial liveness probe.
async fn handle_healthz() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse::default()))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
