//! In-memory backend. Also the working set behind the file snapshot store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use runmetrics_core::{Counter, Gauge, MetricEnvelope, MetricUpdate, validate_batch};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{MetricsStore, StoreFuture};

#[derive(Debug, Default)]
struct State {
    gauges: HashMap<String, Gauge>,
    counters: HashMap<String, Counter>,
    allowed_gauges: HashSet<String>,
    allowed_counters: HashSet<String>,
}

impl State {
    fn set_gauge(&mut self, name: &str, value: Gauge) {
        self.gauges.insert(name.to_string(), value);
        self.allowed_gauges.insert(name.to_string());
    }

    fn add_counter(&mut self, name: &str, delta: Counter) {
        let slot = self.counters.entry(name.to_string()).or_insert(0);
        *slot = slot.saturating_add(delta);
        self.allowed_counters.insert(name.to_string());
    }

    fn apply(&mut self, update: &MetricUpdate) {
        match update {
            MetricUpdate::Gauge { name, value } => self.set_gauge(name, *value),
            MetricUpdate::Counter { name, delta } => self.add_counter(name, *delta),
        }
    }
}

/// Full store state as persisted by the file backend.
///
/// Field names are kept stable so existing snapshot files stay readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(rename = "GaugeMetrics", default)]
    pub gauges: BTreeMap<String, Gauge>,
    #[serde(rename = "CounterMetrics", default)]
    pub counters: BTreeMap<String, Counter>,
    #[serde(rename = "AllowedGaugeNames", default)]
    pub allowed_gauges: BTreeMap<String, bool>,
    #[serde(rename = "AllowedCounterNames", default)]
    pub allowed_counters: BTreeMap<String, bool>,
}

/// Map-backed store behind a single reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a persisted snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let allowed = |names: BTreeMap<String, bool>| -> HashSet<String> {
            names
                .into_iter()
                .filter_map(|(name, on)| on.then_some(name))
                .collect()
        };

        let mut state = State {
            allowed_gauges: allowed(snapshot.allowed_gauges),
            allowed_counters: allowed(snapshot.allowed_counters),
            ..Default::default()
        };
        for (name, value) in snapshot.gauges {
            state.set_gauge(&name, value);
        }
        for (name, value) in snapshot.counters {
            state.counters.insert(name.clone(), value);
            state.allowed_counters.insert(name);
        }

        Self {
            state: RwLock::new(state),
        }
    }

    pub fn to_snapshot(&self) -> StoreResult<StoreSnapshot> {
        let state = self.read()?;
        Ok(StoreSnapshot {
            gauges: state.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            counters: state.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            allowed_gauges: state
                .allowed_gauges
                .iter()
                .map(|k| (k.clone(), true))
                .collect(),
            allowed_counters: state
                .allowed_counters
                .iter()
                .map(|k| (k.clone(), true))
                .collect(),
        })
    }

    pub(crate) fn gauge(&self, name: &str) -> StoreResult<Option<Gauge>> {
        let state = self.read()?;
        Ok(state.gauges.get(name).copied().or_else(|| {
            state.allowed_gauges.contains(name).then_some(0.0)
        }))
    }

    pub(crate) fn counter(&self, name: &str) -> StoreResult<Option<Counter>> {
        let state = self.read()?;
        Ok(state.counters.get(name).copied().or_else(|| {
            state.allowed_counters.contains(name).then_some(0)
        }))
    }

    pub(crate) fn set_gauge(&self, name: &str, value: Gauge) -> StoreResult<()> {
        self.write()?.set_gauge(name, value);
        Ok(())
    }

    pub(crate) fn add_to_counter(&self, name: &str, delta: Counter) -> StoreResult<()> {
        self.write()?.add_counter(name, delta);
        Ok(())
    }

    pub(crate) fn gauge_allowed(&self, name: &str) -> StoreResult<bool> {
        Ok(self.read()?.allowed_gauges.contains(name))
    }

    pub(crate) fn counter_allowed(&self, name: &str) -> StoreResult<bool> {
        Ok(self.read()?.allowed_counters.contains(name))
    }

    pub(crate) fn apply(&self, batch: &[MetricEnvelope]) -> StoreResult<()> {
        let updates = validate_batch(batch)?;
        let mut state = self.write()?;
        for update in &updates {
            state.apply(update);
        }
        debug!(count = updates.len(), "batch applied");
        Ok(())
    }

    /// Every readable metric. Allowed names with no stored value are listed
    /// at zero, matching what [`Self::gauge`] and [`Self::counter`] return.
    pub(crate) fn envelopes(&self) -> StoreResult<Vec<MetricEnvelope>> {
        let state = self.read()?;
        let mut out = Vec::with_capacity(state.allowed_gauges.len() + state.allowed_counters.len());
        out.extend(
            state
                .gauges
                .iter()
                .map(|(name, value)| MetricEnvelope::gauge(name.clone(), *value)),
        );
        out.extend(
            state
                .allowed_gauges
                .iter()
                .filter(|name| !state.gauges.contains_key(*name))
                .map(|name| MetricEnvelope::gauge(name.clone(), 0.0)),
        );
        out.extend(
            state
                .counters
                .iter()
                .map(|(name, delta)| MetricEnvelope::counter(name.clone(), *delta)),
        );
        out.extend(
            state
                .allowed_counters
                .iter()
                .filter(|name| !state.counters.contains_key(*name))
                .map(|name| MetricEnvelope::counter(name.clone(), 0)),
        );
        Ok(out)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

impl MetricsStore for MemoryStore {
    fn add_gauge<'a>(&'a self, name: &'a str, value: Gauge) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.set_gauge(name, value) })
    }

    fn add_counter<'a>(&'a self, name: &'a str, delta: Counter) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.add_to_counter(name, delta) })
    }

    fn get_gauge<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Gauge>> {
        Box::pin(async move { self.gauge(name) })
    }

    fn get_counter<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Counter>> {
        Box::pin(async move { self.counter(name) })
    }

    fn is_gauge_allowed<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.gauge_allowed(name) })
    }

    fn is_counter_allowed<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.counter_allowed(name) })
    }

    fn apply_batch<'a>(&'a self, batch: &'a [MetricEnvelope]) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.apply(batch) })
    }

    fn snapshot(&self) -> StoreFuture<'_, Vec<MetricEnvelope>> {
        Box::pin(async move { self.envelopes() })
    }
}
