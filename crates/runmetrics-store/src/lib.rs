//! runmetrics-store — metric storage for the collector and the agent.
//!
//! Every backend implements [`MetricsStore`]: a flat namespace of named
//! gauges (last write wins) and counters (deltas accumulate), one
//! namespace per kind.
//!
//! # Backends
//!
//! | Backend | Persistence | Batch semantics |
//! |---|---|---|
//! | [`MemoryStore`] | none | validated up front, applied under one lock |
//! | [`FileSnapshotStore`] | JSON snapshot file, restored at startup | as memory |
//! | [`RelationalStore`] | Postgres, two upsert tables | one transaction |
//!
//! The backend is picked once at startup by [`open_store`] and shared as
//! [`SharedStore`] (`Arc<dyn MetricsStore>`).

pub mod error;
pub mod file;
pub mod flush;
pub mod memory;
pub mod relational;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use file::FileSnapshotStore;
pub use flush::run_flush_loop;
pub use memory::{MemoryStore, StoreSnapshot};
pub use relational::RelationalStore;
pub use store::{MetricsStore, SharedStore, StoreFuture, open_store};
