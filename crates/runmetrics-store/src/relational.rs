//! Postgres backend.
//!
//! Every operation runs under the standard retry schedule. Connection-class
//! failures are retried; everything else (including a timed-out attempt) is
//! returned to the caller as is.

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use runmetrics_core::retry::retry;
use runmetrics_core::{Backoff, Counter, Gauge, MetricEnvelope, MetricUpdate, validate_batch};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::{MetricsStore, StoreFuture};
use crate::tables::*;

/// Upper bound for a single attempt of any store call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLSTATE codes for lost connections and protocol violations.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "08000", "08003", "08006", "08001", "08004", "08007", "08P01",
];

/// Whether a store error is worth another attempt.
pub fn is_transient_sql(err: &StoreError) -> bool {
    let StoreError::Database(err) = err else {
        return false;
    };
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| TRANSIENT_SQLSTATES.iter().any(|state| code == *state)),
        sqlx::Error::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
        ),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct RelationalStore {
    pool: PgPool,
    backoff: Backoff,
    op_timeout: Duration,
}

impl RelationalStore {
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        Self::connect_with(dsn, Backoff::standard(), DEFAULT_OP_TIMEOUT).await
    }

    pub async fn connect_with(
        dsn: &str,
        backoff: Backoff,
        op_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = retry(
            &backoff,
            move || async move {
                PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(op_timeout)
                    .connect(dsn)
                    .await
                    .map_err(StoreError::from)
            },
            is_transient_sql,
        )
        .await?;
        info!("connected to postgres");

        Ok(Self {
            pool,
            backoff,
            op_timeout,
        })
    }

    /// Drop and recreate both tables. Run once at startup.
    pub async fn migrate(&self) -> StoreResult<()> {
        self.run(move || async move {
            for statement in MIGRATION {
                sqlx::query(statement).execute(&self.pool).await?;
            }
            Ok::<_, StoreError>(())
        })
        .await?;
        info!("metric tables recreated");
        Ok(())
    }

    /// Run `op` with a per-attempt timeout under the retry schedule.
    async fn run<T, F, Fut>(&self, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let op_timeout = self.op_timeout;
        retry(
            &self.backoff,
            move || {
                let attempt = op();
                async move {
                    tokio::time::timeout(op_timeout, attempt)
                        .await
                        .unwrap_or(Err(StoreError::Timeout))
                }
            },
            is_transient_sql,
        )
        .await
    }

    async fn apply_updates(&self, updates: &[MetricUpdate]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for update in updates {
            match update {
                MetricUpdate::Gauge { name, value } => {
                    sqlx::query(UPSERT_GAUGE)
                        .bind(name.as_str())
                        .bind(*value)
                        .execute(&mut *tx)
                        .await?;
                }
                MetricUpdate::Counter { name, delta } => {
                    sqlx::query(UPSERT_COUNTER)
                        .bind(name.as_str())
                        .bind(*delta)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

impl MetricsStore for RelationalStore {
    fn add_gauge<'a>(&'a self, name: &'a str, value: Gauge) -> StoreFuture<'a, ()> {
        Box::pin(self.run(move || async move {
            sqlx::query(UPSERT_GAUGE)
                .bind(name)
                .bind(value)
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(StoreError::from)
        }))
    }

    fn add_counter<'a>(&'a self, name: &'a str, delta: Counter) -> StoreFuture<'a, ()> {
        Box::pin(self.run(move || async move {
            sqlx::query(UPSERT_COUNTER)
                .bind(name)
                .bind(delta)
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(StoreError::from)
        }))
    }

    fn get_gauge<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Gauge>> {
        Box::pin(self.run(move || async move {
            sqlx::query_scalar::<_, f64>(SELECT_GAUGE)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from)
        }))
    }

    fn get_counter<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Counter>> {
        Box::pin(self.run(move || async move {
            sqlx::query_scalar::<_, i64>(SELECT_COUNTER)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from)
        }))
    }

    fn is_gauge_allowed<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.get_gauge(name).await?.is_some()) })
    }

    fn is_counter_allowed<'a>(&'a self, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.get_counter(name).await?.is_some()) })
    }

    fn apply_batch<'a>(&'a self, batch: &'a [MetricEnvelope]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let updates = validate_batch(batch)?;
            if updates.is_empty() {
                return Ok(());
            }
            let updates = &updates;
            self.run(move || self.apply_updates(updates)).await?;
            debug!(count = updates.len(), "batch committed");
            Ok(())
        })
    }

    fn snapshot(&self) -> StoreFuture<'_, Vec<MetricEnvelope>> {
        Box::pin(self.run(move || async move {
            let gauges = sqlx::query_as::<_, (String, f64)>(SELECT_ALL_GAUGES)
                .fetch_all(&self.pool)
                .await?;
            let counters = sqlx::query_as::<_, (String, i64)>(SELECT_ALL_COUNTERS)
                .fetch_all(&self.pool)
                .await?;

            let mut out = Vec::with_capacity(gauges.len() + counters.len());
            out.extend(gauges.into_iter().map(|(id, v)| MetricEnvelope::gauge(id, v)));
            out.extend(counters.into_iter().map(|(id, d)| MetricEnvelope::counter(id, d)));
            Ok::<_, StoreError>(out)
        }))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.run(move || async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(StoreError::from)
        }))
    }
}
