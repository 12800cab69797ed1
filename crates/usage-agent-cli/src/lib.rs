//! # Usage-Agent CLI
//!
//! Parses the agent's flat flag set (`--config`, `--state-dir`,
//! `--no-state`, `--local-port`), validates the invocation, and hands off to
//! `usage_agent_service::run`.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usage_agent_api::LoggingConfig;
use usage_agent_service::{ServiceArgs, ServiceError};

/// Local usage-metering aggregation and delivery agent.
#[derive(Debug, Parser)]
#[command(name = "usage-agent", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "USAGE_AGENT_CONFIG")]
    pub config: PathBuf,

    /// Directory to persist aggregator and sender state under. Required
    /// unless `--no-state` is given.
    #[arg(long, env = "USAGE_AGENT_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Run with an in-memory, non-durable store instead of disk state.
    #[arg(long)]
    pub no_state: bool,

    /// Port the HTTP surface listens on.
    #[arg(long, default_value_t = 8099)]
    pub local_port: u16,
}

impl Cli {
    fn into_service_args(self) -> Result<ServiceArgs, CliError> {
        if self.local_port == 0 {
            return Err(CliError::InvalidArgument {
                message: "--local-port must be greater than 0".to_string(),
            });
        }

        let state_dir = match (self.no_state, self.state_dir) {
            (true, Some(_)) => {
                return Err(CliError::InvalidArgument {
                    message: "--state-dir cannot be combined with --no-state".to_string(),
                })
            }
            (true, None) => None,
            (false, Some(dir)) => Some(dir),
            (false, None) => {
                return Err(CliError::InvalidArgument {
                    message: "--state-dir is required unless --no-state is set".to_string(),
                })
            }
        };

        Ok(ServiceArgs {
            config_path: self.config,
            state_dir,
            local_port: self.local_port,
        })
    }
}

/// Invocation and runtime errors surfaced to `main`.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid arguments: {message}")]
    InvalidArgument { message: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl CliError {
    /// Exit code for this failure: `2` for bad invocation, `1` for every
    /// other fatal startup/runtime failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument { .. } => 2,
            CliError::Service(_) => 1,
        }
    }
}

/// Initialize the global `tracing` subscriber from `logging`, falling back
/// to `RUST_LOG` when set so operators can override the configured level
/// without editing the config file.
///
/// Called before configuration is fully loaded and validated, so a config
/// file that fails to parse still runs with `logging`'s defaults long
/// enough for the resulting `CliError` to be logged.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "usage_agent_cli={level},usage_agent_service={level},usage_agent_api={level},usage_agent_core={level}",
            level = logging.level,
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Load `logging` out of the config at `config_path` for [`init_logging`]'s
/// sake, ahead of the full configuration load `usage_agent_service::run`
/// performs. Falls back to defaults on any error so a malformed or missing
/// config file still produces a logged, actionable `CliError` rather than
/// panicking before logging exists.
fn preload_logging_config(config_path: &std::path::Path) -> LoggingConfig {
    usage_agent_api::load_config(config_path)
        .map(|config| config.logging)
        .unwrap_or_default()
}

/// Parse arguments, validate them, and run the agent until it shuts down.
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging(&preload_logging_config(&cli.config));

    let args = cli.into_service_args()?;
    usage_agent_service::run(args).await?;
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
