//! Agent mode: sample this process and report to a collector.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use runmetrics_agent::Agent;
use runmetrics_core::AgentConfig;
use runmetrics_store::{MemoryStore, MetricsStore, SharedStore};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Args)]
pub struct AgentArgs {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Collector address (host:port).
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between samples.
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Seconds between reports.
    #[arg(short = 'r', long, env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Shared key for HMAC-SHA256 signing.
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,
}

impl AgentArgs {
    pub fn into_config(self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(poll) = self.poll_interval {
            config.poll_interval_secs = poll;
        }
        if let Some(report) = self.report_interval {
            config.report_interval_secs = report;
        }
        if let Some(key) = self.key {
            config.key = Some(key);
        }
        Ok(config)
    }
}

pub async fn run_agent(args: AgentArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;
    config.validate().context("invalid agent configuration")?;
    info!(
        collector = %config.address,
        poll_secs = config.poll_interval_secs,
        report_secs = config.report_interval_secs,
        signed = config.signing_key().is_some(),
        "metricsd agent starting"
    );

    let store: SharedStore = Arc::new(MemoryStore::new());
    store
        .capture_self_metrics()
        .await
        .context("initial self-metrics capture failed")?;

    let agent = Agent::new(store, &config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { agent.run(shutdown_rx).await });

    crate::shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    handle.await?;

    info!("metricsd agent stopped");
    Ok(())
}
