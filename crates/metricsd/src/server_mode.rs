//! Server mode: the collector.
//!
//! 1. Resolve and validate configuration
//! 2. Open the configured store (restoring or migrating as needed)
//! 3. Start the periodic flush loop when a store interval is set
//! 4. Serve the HTTP API until Ctrl-C, then flush once more

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Args};
use runmetrics_api::{ApiState, build_router};
use runmetrics_core::{FlushMode, ServerConfig};
use runmetrics_store::{open_store, run_flush_loop};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (host:port).
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between snapshot flushes; 0 flushes after every write.
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file; an empty value disables file persistence.
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<String>,

    /// Restore the snapshot file at startup.
    #[arg(short = 'r', long, env = "RESTORE", action = ArgAction::Set)]
    restore: Option<bool>,

    /// Postgres DSN; selects the relational store.
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Shared key for HMAC-SHA256 signing.
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,
}

impl ServerArgs {
    pub fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(interval) = self.store_interval {
            config.store_interval_secs = interval;
        }
        if let Some(path) = self.file_storage_path {
            config.file_storage_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(restore) = self.restore {
            config.restore = restore;
        }
        if let Some(dsn) = self.database_dsn {
            config.database_dsn = Some(dsn);
        }
        if let Some(key) = self.key {
            config.key = Some(key);
        }
        Ok(config)
    }
}

pub async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;
    config.validate().context("invalid server configuration")?;
    info!(
        address = %config.address,
        flush = ?config.flush_mode(),
        signed = config.signing_key().is_some(),
        "metricsd server starting"
    );

    let store = open_store(&config)
        .await
        .context("failed to open metrics store")?;

    let flush_mode = config.flush_mode();
    let state = ApiState::new(store.clone())
        .with_key(config.signing_key())
        .with_flush_on_write(flush_mode == FlushMode::OnWrite);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush_handle = match flush_mode {
        FlushMode::Periodic(interval) => {
            Some(tokio::spawn(run_flush_loop(store.clone(), interval, shutdown_rx)))
        }
        FlushMode::OnWrite => None,
    };

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    info!(address = %config.address, "API server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            crate::shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    match flush_handle {
        // The loop flushes once more on its way out.
        Some(handle) => {
            let _ = handle.await;
        }
        None => {
            if let Err(e) = store.flush().await {
                error!(error = %e, "final flush failed");
            }
        }
    }

    info!("metricsd server stopped");
    Ok(())
}
