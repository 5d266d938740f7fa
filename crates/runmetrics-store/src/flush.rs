//! Periodic snapshot flushing.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::store::SharedStore;

/// Flush `store` every `interval` until `shutdown` changes, then flush once
/// more. Flush errors are logged and the next tick tries again.
pub async fn run_flush_loop(
    store: SharedStore,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "snapshot flush loop started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match store.flush().await {
                    Ok(()) => debug!("periodic flush complete"),
                    Err(e) => error!(error = %e, "periodic flush failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("snapshot flush loop shutting down");
                if let Err(e) = store.flush().await {
                    error!(error = %e, "final flush failed");
                }
                break;
            }
        }
    }
}
