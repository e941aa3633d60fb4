use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;

use crate::{LoaderError, Result};

/// Decides whether a failed attempt may be retried.
pub type Classifier = fn(&sqlx::Error) -> bool;

/// Retries every error. Matches the historical loader behaviour, including
/// retrying deterministic failures such as syntax errors.
pub fn always(_: &sqlx::Error) -> bool {
    true
}

/// Retries only failures that can plausibly succeed on a fresh connection:
/// I/O and TLS errors, timeouts, and server errors of the connection,
/// serialization, deadlock, shutdown and too-many-connections classes.
pub fn transient_only(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => {
                code.starts_with("08")
                    || matches!(
                        &*code,
                        "40001" | "40P01" | "57P01" | "57P02" | "57P03" | "53300"
                    )
            }
            None => false,
        },
        _ => false,
    }
}

/// Delay inserted between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// `base * 2^(n-1)` after the n-th failure, capped at `max`, then
    /// jittered uniformly into its upper half.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Upper bound of the delay after `failures` failed attempts.
    pub fn ceiling(&self, failures: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Exponential { base, max } => {
                let factor = 1u32 << failures.saturating_sub(1).min(16);
                base.saturating_mul(factor).min(max)
            }
        }
    }

    pub fn delay(&self, failures: u32) -> Duration {
        let ceiling = self.ceiling(failures);
        if ceiling.is_zero() {
            return ceiling;
        }
        let ceiling_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub classifier: Classifier,
}

impl RetryPolicy {
    /// Up to `max_attempts` attempts, no delay, every error retried.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
            classifier: always,
        }
    }

    /// Up to `max_attempts` attempts with jittered exponential backoff,
    /// retrying only transient failures.
    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, max },
            classifier: transient_only,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Attempts actually made; zero is treated as a single attempt.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Drive `op` until it succeeds, the classifier rejects an error, or the
    /// attempts run out. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = sqlx::Result<T>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !(self.classifier)(&err) {
                return Err(LoaderError::NonRetryable {
                    attempt,
                    source: err,
                });
            }
            if attempt >= attempts {
                return Err(LoaderError::RetryExhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            warn!("attempt {attempt}/{attempts} failed: {err}");
            let delay = self.backoff.delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn io_error() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
    }

    #[tokio::test]
    async fn succeeds_on_last_attempt() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::immediate(3);

        let result = policy
            .run(|attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(io_error())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_exactly_max_attempts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::immediate(4);

        let result: Result<()> = policy
            .run(|_| {
                calls.set(calls.get() + 1);
                async { Err(sqlx::Error::Protocol("syntax error".into())) }
            })
            .await;

        assert_eq!(calls.get(), 4);
        match result {
            Err(LoaderError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(source, sqlx::Error::Protocol(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::immediate(0)
            .run(|_| {
                calls.set(calls.get() + 1);
                async { Err(io_error()) }
            })
            .await;

        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(LoaderError::RetryExhausted { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn classifier_stops_permanent_errors() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::immediate(5).with_classifier(transient_only);

        let result: Result<()> = policy
            .run(|_| {
                calls.set(calls.get() + 1);
                async { Err(sqlx::Error::RowNotFound) }
            })
            .await;

        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(LoaderError::NonRetryable { attempt: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_policy_waits_between_attempts() {
        let policy =
            RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        let result: Result<()> = policy.run(|_| async { Err(io_error()) }).await;

        assert!(matches!(result, Err(LoaderError::RetryExhausted { attempts: 3, .. })));
        // two sleeps: at least 50ms + 100ms once jitter halves them
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn backoff_ceiling_doubles_and_caps() {
        let b = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(b.ceiling(1), Duration::from_millis(100));
        assert_eq!(b.ceiling(2), Duration::from_millis(200));
        assert_eq!(b.ceiling(3), Duration::from_millis(400));
        assert_eq!(b.ceiling(4), Duration::from_millis(500));
        assert_eq!(Backoff::None.delay(7), Duration::ZERO);

        for failures in 1..6 {
            let d = b.delay(failures);
            assert!(d <= b.ceiling(failures));
            assert!(d >= b.ceiling(failures) / 2);
        }
    }

    #[test]
    fn transient_classification() {
        assert!(transient_only(&io_error()));
        assert!(transient_only(&sqlx::Error::PoolTimedOut));
        assert!(!transient_only(&sqlx::Error::RowNotFound));
        assert!(always(&sqlx::Error::RowNotFound));
    }
}
