//! File-snapshot backend: a [`MemoryStore`] plus a JSON snapshot on disk.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use runmetrics_core::{Counter, Gauge, MetricEnvelope};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::memory::{MemoryStore, StoreSnapshot};
use crate::store::{MetricsStore, StoreFuture};

#[derive(Debug)]
pub struct FileSnapshotStore {
    memory: MemoryStore,
    path: PathBuf,
    flush_lock: Mutex<()>,
}

impl FileSnapshotStore {
    /// Open the store, restoring from `path` when asked to.
    ///
    /// A missing or empty file starts an empty store. A file that does not
    /// parse is an error: the process must not start on corrupt state.
    pub fn open(path: &Path, restore: bool) -> StoreResult<Self> {
        let memory = if restore {
            match Self::restore(path)? {
                Some(snapshot) => {
                    info!(
                        path = %path.display(),
                        gauges = snapshot.gauges.len(),
                        counters = snapshot.counters.len(),
                        "restored metrics snapshot"
                    );
                    MemoryStore::from_snapshot(snapshot)
                }
                None => MemoryStore::new(),
            }
        } else {
            MemoryStore::new()
        };

        Ok(Self {
            memory,
            path: path.to_path_buf(),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn restore(path: &Path) -> StoreResult<Option<StoreSnapshot>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Deserialize(format!("{}: {e}", path.display())))
    }

    /// Replace the snapshot file with the current state.
    ///
    /// The snapshot goes to a sibling temp file first and is renamed over
    /// `path`, so readers only ever see a complete snapshot. Flushes are
    /// serialized; the one that takes the lock last writes the newest state.
    pub fn flush_to_file(&self) -> StoreResult<()> {
        let _guard = self.flush_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let snapshot = self.memory.to_snapshot()?;
        let mut line =
            serde_json::to_vec(&snapshot).map_err(|e| StoreError::Serialize(e.to_string()))?;
        line.push(b'\n');

        let tmp = self.temp_path();
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&line)?;
            file.sync_all()?;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), "metrics snapshot written");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "metrics".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl MetricsStore for FileSnapshotStore {
    fn add_gauge<'a>(&'a self, name: &'a str, value: Gauge) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.memory.set_gauge(name, value) })
    }

    fn add_counter<'a>(&'a self, name: &'a str, delta: Counter) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.memory.add_to_counter(name, delta) })
    }

    fn get_gauge<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Gauge>> {
        Box::pin(async move { self.memory.gauge(name) })
    }

    fn get_counter<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Counter>> {
        Box::pin(async move { self.memory.counter(name) })
    }

    fn is_gauge_allowed<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.memory.gauge_allowed(name) })
    }

    fn is_counter_allowed<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.memory.counter_allowed(name) })
    }

    fn apply_batch<'a>(&'a self, batch: &'a [MetricEnvelope]) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.memory.apply(batch) })
    }

    fn snapshot(&self) -> StoreFuture<'_, Vec<MetricEnvelope>> {
        Box::pin(async move { self.memory.envelopes() })
    }

    fn flush(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.flush_to_file() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flush_then_restore_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = FileSnapshotStore::open(&path, true).unwrap();
        store.add_gauge("Alloc", 123.45).await.unwrap();
        store.add_counter("PollCount", 3).await.unwrap();
        store.add_counter("PollCount", 4).await.unwrap();
        store.flush().await.unwrap();

        let restored = FileSnapshotStore::open(&path, true).unwrap();
        assert_eq!(restored.get_gauge("Alloc").await.unwrap(), Some(123.45));
        assert_eq!(restored.get_counter("PollCount").await.unwrap(), Some(7));
        assert!(restored.is_counter_allowed("PollCount").await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_is_a_single_line_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = FileSnapshotStore::open(&path, false).unwrap();
        store.add_gauge("g", 1.0).await.unwrap();
        store.flush().await.unwrap();
        store.add_gauge("g", 2.0).await.unwrap();
        store.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"g\":2.0"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_flushes_leave_a_readable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let store = std::sync::Arc::new(FileSnapshotStore::open(&path, false).unwrap());

        for round in 0..20 {
            let mut tasks = Vec::new();
            for task in 0..8 {
                let store = store.clone();
                tasks.push(tokio::spawn(async move {
                    let value = if (round + task) % 2 == 0 {
                        123_456_789.123_456_78
                    } else {
                        1.0
                    };
                    store.add_gauge("g", value).await.unwrap();
                    store.add_counter(&format!("c{task}"), 1).await.unwrap();
                    store.flush().await.unwrap();
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }

            let restored = FileSnapshotStore::open(&path, true).unwrap();
            assert!(restored.get_gauge("g").await.unwrap().is_some());
            assert_eq!(
                restored.get_counter("c0").await.unwrap(),
                Some(round as i64 + 1)
            );
        }
        assert!(!dir.path().join("m.json.tmp").exists());
    }

    #[test]
    fn missing_or_empty_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let store = FileSnapshotStore::open(&missing, true).unwrap();
        assert!(store.memory.envelopes().unwrap().is_empty());

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "").unwrap();
        let store = FileSnapshotStore::open(&empty, true).unwrap();
        assert!(store.memory.envelopes().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{\"GaugeMetrics\": ").unwrap();

        let err = FileSnapshotStore::open(&path, true).unwrap_err();
        assert!(matches!(err, StoreError::Deserialize(_)));
    }

    #[test]
    fn restore_disabled_ignores_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = FileSnapshotStore::open(&path, false).unwrap();
        assert!(store.memory.envelopes().unwrap().is_empty());
    }

    #[test]
    fn reads_legacy_snapshot_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"{"GaugeMetrics":{"Alloc":1.5},"CounterMetrics":{"PollCount":2},"AllowedGaugeNames":{"Alloc":true,"Sys":true},"AllowedCounterNames":{"PollCount":true}}"#,
        )
        .unwrap();

        let store = FileSnapshotStore::open(&path, true).unwrap();
        assert_eq!(store.memory.gauge("Alloc").unwrap(), Some(1.5));
        assert_eq!(store.memory.gauge("Sys").unwrap(), Some(0.0));
        assert_eq!(store.memory.counter("PollCount").unwrap(), Some(2));
    }
}
