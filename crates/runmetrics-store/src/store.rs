//! The backend-agnostic store contract and startup backend selection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use runmetrics_core::{
    BackendKind, Counter, Gauge, MetricEnvelope, RuntimeStats, ServerConfig,
};
use tracing::info;

use crate::error::StoreResult;
use crate::file::FileSnapshotStore;
use crate::memory::MemoryStore;
use crate::relational::RelationalStore;

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// A store shared between the HTTP layer and background tasks.
pub type SharedStore = Arc<dyn MetricsStore>;

/// Named gauges and counters, one namespace per kind.
///
/// Writes register unknown names (admit on first write). Reads of an
/// unregistered name return `None`, never an error. Implementations do
/// their own locking; callers never need to.
pub trait MetricsStore: Send + Sync {
    /// Replace the gauge value.
    fn add_gauge<'a>(&'a self, name: &'a str, value: Gauge) -> StoreFuture<'a, ()>;

    /// Add `delta` to the counter, starting from 0.
    fn add_counter<'a>(&'a self, name: &'a str, delta: Counter) -> StoreFuture<'a, ()>;

    fn get_gauge<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Gauge>>;

    fn get_counter<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Counter>>;

    fn is_gauge_allowed<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool>;

    fn is_counter_allowed<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool>;

    /// Apply every envelope. A malformed envelope fails the whole batch
    /// before anything is written.
    fn apply_batch<'a>(&'a self, batch: &'a [MetricEnvelope]) -> StoreFuture<'a, ()>;

    /// Every stored metric exactly once, as envelopes.
    fn snapshot(&self) -> StoreFuture<'_, Vec<MetricEnvelope>>;

    /// Record current process statistics under their well-known names.
    fn capture_self_metrics(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let batch = RuntimeStats::read().capture_batch();
            self.apply_batch(&batch).await
        })
    }

    /// Backend liveness check.
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Persist current state, for backends that persist explicitly.
    fn flush(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Build the backend the configuration selects. Called once at startup.
pub async fn open_store(config: &ServerConfig) -> StoreResult<SharedStore> {
    match config.backend() {
        BackendKind::Relational(dsn) => {
            let store = RelationalStore::connect(&dsn).await?;
            store.migrate().await?;
            info!("using relational store");
            Ok(Arc::new(store))
        }
        BackendKind::File(path) => {
            let store = FileSnapshotStore::open(&path, config.restore)?;
            info!(path = %path.display(), restore = config.restore, "using file snapshot store");
            Ok(Arc::new(store))
        }
        BackendKind::Memory => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
