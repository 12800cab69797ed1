use usage_agent_cli::run_cli;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        tracing::error!("usage-agent failed: {e}");
        std::process::exit(e.exit_code());
    }
}
