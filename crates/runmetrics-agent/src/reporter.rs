//! One report cycle: snapshot, encode, send, settle counters.

use std::time::Duration;

use anyhow::Context;
use runmetrics_core::retry::{always_transient, retry};
use runmetrics_core::{AgentConfig, Backoff, MetricKind, wire};
use runmetrics_store::SharedStore;
use tracing::{debug, info};

use crate::client;

/// Upper bound for one POST attempt.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Reporter {
    store: SharedStore,
    address: String,
    key: Option<Vec<u8>>,
    backoff: Backoff,
    send_timeout: Duration,
}

impl Reporter {
    pub fn new(store: SharedStore, config: &AgentConfig) -> Self {
        Self {
            store,
            address: config.address.clone(),
            key: config.signing_key().map(|k| k.as_bytes().to_vec()),
            backoff: Backoff::standard(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Send everything in the local store as one batch.
    ///
    /// Returns the number of metrics sent; an empty store sends nothing.
    /// On success the delivered counter deltas are subtracted locally, so
    /// increments that land during the send are kept for the next cycle.
    /// When the retry schedule runs out the error is returned and the
    /// local store is left untouched.
    pub async fn report_once(&self) -> anyhow::Result<usize> {
        let batch = self
            .store
            .snapshot()
            .await
            .context("reading local metrics")?;
        if batch.is_empty() {
            debug!("nothing to report");
            return Ok(0);
        }

        let encoded = wire::encode_request(&batch, self.key.as_deref())?;
        let encoded = &encoded;
        let address = self.address.as_str();
        let timeout = self.send_timeout;
        retry(
            &self.backoff,
            move || client::post_batch(address, encoded, timeout),
            always_transient,
        )
        .await
        .with_context(|| format!("sending {} metrics to {}", batch.len(), self.address))?;

        for envelope in &batch {
            if envelope.kind != MetricKind::Counter {
                continue;
            }
            if let Some(delta) = envelope.delta.filter(|d| *d != 0) {
                self.store
                    .add_counter(&envelope.id, delta.saturating_neg())
                    .await
                    .context("settling delivered counters")?;
            }
        }

        info!(count = batch.len(), bytes = encoded.body.len(), "metrics reported");
        Ok(batch.len())
    }
}
