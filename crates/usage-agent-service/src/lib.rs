//! # Usage-Agent Service
//!
//! Wires configuration into a running pipeline: builds the configured
//! `Persistence`, `Endpoint`s and `RetryingSender`s, recovers their state,
//! drains any orphaned sender queues, and serves the HTTP surface from
//! `usage-agent-api` with graceful shutdown.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use usage_agent_api::{
    create_router, load_config, log_window_close_failure, AppState, ConfigError, EndpointConfig,
};
use usage_agent_core::endpoint::{DiskEndpoint, ServiceControlEndpoint};
use usage_agent_core::persistence::{DiskPersistence, MemoryPersistence};
use usage_agent_core::{
    spawn_worker, AcceptError, Aggregator, Dispatcher, Endpoint, Persistence, PersistenceError,
    RetryPolicy, RetryingSender, SenderError, StatusTracker,
};

/// Invocation parameters for one agent process, gathered by the CLI layer
/// from `--config` / `--state-dir` / `--no-state` / `--local-port` (spec
/// section 6).
#[derive(Debug, Clone)]
pub struct ServiceArgs {
    pub config_path: PathBuf,
    pub state_dir: Option<PathBuf>,
    pub local_port: u16,
}

/// Fatal startup or runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("sender error: {0}")]
    Sender(#[from] SenderError),

    #[error("aggregator error: {0}")]
    Aggregator(#[from] AcceptError),

    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed: {source}")]
    ServerFailed {
        #[source]
        source: std::io::Error,
    },
}

/// Build the pipeline from `args`, serve the HTTP surface until a shutdown
/// signal arrives, then tear the pipeline down in order: stop accepting
/// reports, force a final window close, stop every sender worker without
/// draining its (durable) queue.
pub async fn run(args: ServiceArgs) -> Result<(), ServiceError> {
    let config = load_config(&args.config_path)?;

    let persistence: Arc<dyn Persistence> = match &args.state_dir {
        Some(dir) => Arc::new(DiskPersistence::new(dir.clone()).await?),
        None => Arc::new(MemoryPersistence::new()),
    };

    let retry_policy = config.retry.to_policy();
    let status = Arc::new(StatusTracker::new());

    let mut senders = Vec::with_capacity(config.endpoints.len());
    let mut configured_names = HashSet::with_capacity(config.endpoints.len());
    for endpoint_config in &config.endpoints {
        configured_names.insert(endpoint_config.name().to_string());
        let endpoint = build_endpoint(endpoint_config);
        let sender = Arc::new(RetryingSender::new(
            endpoint,
            persistence.clone(),
            retry_policy.clone(),
        ));
        sender.recover().await?;
        senders.push(sender);
    }

    if let Some(state_dir) = &args.state_dir {
        drain_orphaned_queues(
            persistence.clone(),
            &configured_names,
            retry_policy.clone(),
            state_dir.join("orphaned"),
        )
        .await?;
    }

    for sender in &senders {
        spawn_worker(sender.clone());
    }

    let dispatcher = Arc::new(Dispatcher::new(senders.clone(), status.clone()));
    let schema = config.metric_schema()?;
    let aggregator = Arc::new(Aggregator::new(schema, persistence.clone(), dispatcher));
    aggregator.recover().await?;

    let state = AppState::new(aggregator.clone(), status);
    let app = create_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.local_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServiceError::BindFailed { address: addr, source })?;

    info!(address = %addr, "usage agent listening");

    let window_task = spawn_window_closer(aggregator.clone(), config.window_interval());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .map_err(|source| ServiceError::ServerFailed { source })?;

    info!("HTTP surface drained, closing final window");
    window_task.abort();
    if let Err(e) = aggregator.close_window().await {
        log_window_close_failure(&e);
    }

    for sender in &senders {
        sender.request_shutdown();
    }

    info!("shutdown complete");
    Ok(())
}

fn build_endpoint(config: &EndpointConfig) -> Arc<dyn Endpoint> {
    match config {
        EndpointConfig::Disk { name, directory } => {
            Arc::new(DiskEndpoint::new(name.clone(), directory.clone()))
        }
        EndpointConfig::ServiceControl {
            name,
            report_url,
            operation_name,
        } => Arc::new(ServiceControlEndpoint::new(
            name.clone(),
            report_url.clone(),
            operation_name.clone(),
        )),
    }
}

/// Spawn the timer-driven window closer as its own task, decoupled from the
/// ingest path.
fn spawn_window_closer(aggregator: Arc<Aggregator>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            if let Err(e) = aggregator.close_window().await {
                log_window_close_failure(&e);
            }
        }
    })
}

/// Discover sender queues on disk whose endpoint name no longer appears in
/// configuration, drain them to completion or expiry using the current
/// retry policy, then remove their persisted key. Since the endpoint's
/// original connection details are gone along with its configuration,
/// orphaned reports are flushed to a local disk endpoint under
/// `<state-dir>/orphaned/<name>` rather than silently discarded.
async fn drain_orphaned_queues(
    persistence: Arc<dyn Persistence>,
    configured_names: &HashSet<String>,
    retry_policy: RetryPolicy,
    orphan_directory: PathBuf,
) -> Result<(), ServiceError> {
    let keys = persistence.keys().await?;
    for key in keys {
        let Some(name) = key.strip_prefix("sender/") else {
            continue;
        };
        if configured_names.contains(name) {
            continue;
        }

        info!(endpoint = name, "draining orphaned sender queue");
        let endpoint = Arc::new(DiskEndpoint::new(name, orphan_directory.join(name)));
        let sender = Arc::new(RetryingSender::new(
            endpoint,
            persistence.clone(),
            retry_policy.clone(),
        ));
        sender.recover().await?;

        let handle = spawn_worker(sender.clone());
        wait_for_drain(&sender, retry_policy.max_lifetime + Duration::from_secs(5)).await;
        sender.request_shutdown();
        handle.abort();

        if sender.queue_len().await > 0 {
            warn!(endpoint = name, "orphaned queue did not fully drain before giving up");
        }
        sender.forget().await?;
    }
    Ok(())
}

async fn wait_for_drain(sender: &RetryingSender, max_wait: Duration) {
    let deadline = tokio::time::Instant::now() + max_wait;
    while sender.queue_len().await > 0 {
        if tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve once SIGTERM or SIGINT arrives, flipping `AppState::shutting_down`
/// immediately so in-flight `/report` calls during the graceful-shutdown
/// grace period see `503` rather than racing the teardown.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }

    state.begin_shutdown();
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
