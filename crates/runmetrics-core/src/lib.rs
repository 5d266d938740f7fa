//! runmetrics-core — shared building blocks for the metrics agent and collector.
//!
//! - [`types`]: gauge/counter values and the JSON metric envelope
//! - [`wire`]: batch encoding, gzip framing, and HMAC-SHA256 signing
//! - [`retry`]: fixed-schedule backoff around fallible async operations
//! - [`config`]: server and agent configuration with TOML loading
//! - [`runtime_stats`]: process statistics sampled as self-metrics

pub mod config;
pub mod retry;
pub mod runtime_stats;
pub mod types;
pub mod wire;

pub use config::{AgentConfig, BackendKind, ConfigError, FlushMode, ServerConfig};
pub use retry::Backoff;
pub use runtime_stats::{RuntimeStats, TrackingAllocator};
pub use types::*;
