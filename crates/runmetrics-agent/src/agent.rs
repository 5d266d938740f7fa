//! Poll and report timers.

use std::time::Duration;

use runmetrics_core::AgentConfig;
use runmetrics_store::SharedStore;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

use crate::reporter::Reporter;

pub struct Agent {
    store: SharedStore,
    reporter: Reporter,
    poll_interval: Duration,
    report_interval: Duration,
}

impl Agent {
    pub fn new(store: SharedStore, config: &AgentConfig) -> Self {
        Self {
            reporter: Reporter::new(store.clone(), config),
            store,
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run both timers until `shutdown` changes.
    ///
    /// Polling and reporting are independent loops, so a slow report
    /// (retries included) never delays sampling.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            poll_secs = self.poll_interval.as_secs_f64(),
            report_secs = self.report_interval.as_secs_f64(),
            "agent started"
        );
        tokio::join!(
            self.poll_loop(shutdown.clone()),
            self.report_loop(shutdown)
        );
        info!("agent stopped");
    }

    async fn poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.store.capture_self_metrics().await {
                        warn!(error = %e, "self-metrics capture failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn report_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.report_interval, self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reporter.report_once().await {
                        error!(error = %format!("{e:#}"), "report dropped, counters carry over to the next cycle");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
