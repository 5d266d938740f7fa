//! SQL definitions for the relational backend.
//!
//! Two tables, one per metric kind, keyed by metric name. Writes are
//! upserts: gauges replace, counters add to the stored value.

/// Drop-and-create migration, run once at startup.
pub const MIGRATION: &[&str] = &[
    "DROP TABLE IF EXISTS GaugeMetrics",
    "DROP TABLE IF EXISTS CounterMetrics",
    "CREATE TABLE GaugeMetrics (
        ID varchar(256) PRIMARY KEY,
        Value DOUBLE PRECISION NOT NULL
    )",
    "CREATE TABLE CounterMetrics (
        ID varchar(256) PRIMARY KEY,
        Value BIGINT NOT NULL
    )",
];

pub const UPSERT_GAUGE: &str = "INSERT INTO GaugeMetrics (ID, Value) VALUES ($1, $2)
    ON CONFLICT (ID) DO UPDATE SET Value = EXCLUDED.Value";

/// Counter sums saturate at the BIGINT bounds instead of raising 22003.
pub const UPSERT_COUNTER: &str = "INSERT INTO CounterMetrics (ID, Value) VALUES ($1, $2)
    ON CONFLICT (ID) DO UPDATE SET Value = LEAST(
        GREATEST(CounterMetrics.Value::numeric + EXCLUDED.Value, -9223372036854775808),
        9223372036854775807
    )::bigint";

pub const SELECT_GAUGE: &str = "SELECT Value FROM GaugeMetrics WHERE ID = $1";

pub const SELECT_COUNTER: &str = "SELECT Value FROM CounterMetrics WHERE ID = $1";

pub const SELECT_ALL_GAUGES: &str = "SELECT ID, Value FROM GaugeMetrics";

pub const SELECT_ALL_COUNTERS: &str = "SELECT ID, Value FROM CounterMetrics";
