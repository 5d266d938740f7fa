//! metricsd — runtime metrics collector and agent.
//!
//! One binary, two roles:
//! - `server`: the collector, storing gauges and counters behind an HTTP API
//! - `agent`: samples process statistics and reports them to a collector
//!
//! # Usage
//!
//! ```text
//! metricsd server -a 0.0.0.0:8080 -i 300 -f /var/lib/metrics.json
//! metricsd agent -a collector:8080 -p 2 -r 10 -k secret
//! ```
//!
//! Settings come from an optional TOML file (`--config`), then environment
//! variables, then flags; later sources win.

mod agent_mode;
mod server_mode;

use clap::{Parser, Subcommand};
use runmetrics_core::TrackingAllocator;
use tracing::{error, info};

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator::new();

#[derive(Parser)]
#[command(name = "metricsd", about = "Runtime metrics collector and agent")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the collector server.
    Server(server_mode::ServerArgs),

    /// Run the polling agent.
    Agent(agent_mode::AgentArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Server(args) => server_mode::run_server(args).await,
        Command::Agent(args) => agent_mode::run_agent(args).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,metricsd=debug,runmetrics=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on Ctrl-C.
pub(crate) async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_both_subcommands() {
        let cli = Cli::try_parse_from(["metricsd", "server", "-a", "127.0.0.1:9000"]).unwrap();
        assert!(matches!(cli.command, Command::Server(_)));

        let cli = Cli::try_parse_from(["metricsd", "agent", "-p", "1", "-r", "5"]).unwrap();
        assert!(matches!(cli.command, Command::Agent(_)));
    }
}
