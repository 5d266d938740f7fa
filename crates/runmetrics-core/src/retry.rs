//! Fixed-schedule retry for fallible async operations.
//!
//! The schedule length is the number of attempts. After a failed attempt
//! the classifier decides whether the error is transient: permanent errors
//! are returned immediately, transient ones wait for the next slot of the
//! schedule. Exhausting the schedule returns the last error.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Ordered wait durations between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    schedule: Vec<Duration>,
}

impl Backoff {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    /// Three attempts spaced 1s, 3s, 5s.
    pub fn standard() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }

    /// `attempts` tries with no waiting in between (for tests).
    pub fn immediate(attempts: usize) -> Self {
        Self::new(vec![Duration::ZERO; attempts])
    }

    pub fn attempts(&self) -> usize {
        self.schedule.len().max(1)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::standard()
    }
}

/// Classifier for paths where every failure is worth another try.
pub fn always_transient<E>(_: &E) -> bool {
    true
}

/// Run `op` under `backoff`, retrying while `is_transient` says so.
pub async fn retry<T, E, F, Fut, C>(backoff: &Backoff, mut op: F, is_transient: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let attempts = backoff.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_transient(&err) {
            return Err(err);
        }
        if attempt >= attempts {
            warn!(attempt, error = %err, "retry schedule exhausted");
            return Err(err);
        }

        let wait = backoff
            .schedule
            .get(attempt - 1)
            .copied()
            .unwrap_or_default();
        warn!(attempt, ?wait, error = %err, "transient failure, retrying");
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn always_transient_makes_exactly_schedule_length_attempts() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let res: Result<(), String> = retry(
            &Backoff::immediate(3),
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {n}"))
            },
            always_transient,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(res.unwrap_err(), "failure 3");
    }

    #[tokio::test]
    async fn permanent_error_aborts_after_first_attempt() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let res: Result<(), &str> = retry(
            &Backoff::immediate(3),
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad request")
            },
            |_| false,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(res.unwrap_err(), "bad request");
    }

    #[tokio::test]
    async fn success_after_transient_failures() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let res: Result<u32, &str> = retry(
            &Backoff::immediate(3),
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("connection reset")
                } else {
                    Ok(42)
                }
            },
            always_transient,
        )
        .await;

        assert_eq!(res, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_schedule_still_tries_once() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let res: Result<(), &str> = retry(
            &Backoff::new(Vec::new()),
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down")
            },
            always_transient,
        )
        .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn standard_schedule() {
        let backoff = Backoff::standard();
        assert_eq!(backoff.attempts(), 3);
        assert_eq!(backoff, Backoff::default());
    }
}
