//! runmetrics-agent — the polling side of runmetrics.
//!
//! ```text
//! Agent
//!   ├── poll loop   → store.capture_self_metrics() every poll interval
//!   └── report loop → Reporter::report_once() every report interval
//!                       └── client::post_batch() under the retry schedule
//! ```
//!
//! The agent keeps its readings in a local store. Counters hold only what
//! has not been delivered yet: a successful report subtracts the sent
//! deltas, a failed one leaves them for the next cycle.

pub mod agent;
pub mod client;
pub mod reporter;

pub use agent::Agent;
pub use client::{SendError, post_batch};
pub use reporter::Reporter;
