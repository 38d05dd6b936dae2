//! Retry utilities with a fixed delay.
//!
//! Storage calls are retried a bounded number of times with a constant
//! pause between attempts. Both the attempts and the pauses give way to
//! shutdown so a stopping worker never sits out a full retry budget.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::metrics;
use crate::shutdown::Shutdown;

/// Fixed-delay retry policy for storage calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay: Duration,
    /// Label used in logs and the retry counter.
    pub operation_name: String,
}

impl RetryConfig {
    /// Three attempts two seconds apart.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
            operation_name: operation_name.into(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Same policy under another operation name.
    pub fn named(&self, operation_name: impl Into<String>) -> Self {
        let mut config = self.clone();
        config.operation_name = operation_name.into();
        config
    }
}

/// Outcome of [`retry_async`].
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Every attempt failed; `error` is the last one.
    Failed { error: E, attempts: u32 },
    /// Shutdown arrived before the operation could finish.
    Cancelled { attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Run `operation` until it succeeds or `config.attempts` is used up.
///
/// Every error is retried. An attempt in flight when shutdown fires is
/// abandoned, as is the pause between attempts.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    shutdown: &Shutdown,
    operation: F,
) -> RetryResult<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let name = config.operation_name.as_str();
    let limit = config.attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if shutdown.is_triggered() {
            return RetryResult::Cancelled { attempts: attempt };
        }
        attempt += 1;

        let outcome = tokio::select! {
            _ = shutdown.wait() => return RetryResult::Cancelled { attempts: attempt },
            outcome = operation() => outcome,
        };

        let error = match outcome {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => e,
        };

        if attempt >= limit {
            debug!("{} exhausted {} attempts: {}", name, attempt, error);
            return RetryResult::Failed {
                error,
                attempts: attempt,
            };
        }

        warn!(
            "{} failed ({}/{}), next try in {:?}: {}",
            name, attempt, limit, config.delay, error
        );
        metrics::record_storage_retry(name);

        tokio::select! {
            _ = shutdown.wait() => return RetryResult::Cancelled { attempts: attempt },
            _ = tokio::time::sleep(config.delay) => {}
        }
    }
}

/// Counts consecutive connection failures so a reconnect loop can stop
/// repeating the same warning while the broker stays down.
#[derive(Debug)]
pub struct FailureTracker {
    streak: u32,
    loud_limit: u32,
}

impl FailureTracker {
    /// Log the first `loud_limit` failures of a streak, then go quiet.
    pub fn new(loud_limit: u32) -> Self {
        Self {
            streak: 0,
            loud_limit,
        }
    }

    /// End the current streak.
    pub fn record_success(&mut self) {
        if self.streak > self.loud_limit {
            info!("Connection restored after {} failed attempts", self.streak);
        }
        self.streak = 0;
    }

    /// Extend the streak. Returns whether the caller should log this failure.
    pub fn record_failure(&mut self) -> bool {
        self.streak += 1;
        if self.streak == self.loud_limit + 1 {
            warn!(
                "{} connection attempts failed in a row, logging only recovery from now on",
                self.loud_limit
            );
        }
        self.streak <= self.loud_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::shutdown_channel;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_failure_tracker_goes_quiet() {
        let mut tracker = FailureTracker::new(2);

        let logged: Vec<bool> = (0..4).map(|_| tracker.record_failure()).collect();
        assert_eq!(logged, vec![true, true, false, false]);
        assert_eq!(tracker.failure_count(), 4);

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[test]
    fn test_attempts_never_zero() {
        assert_eq!(RetryConfig::new("x").with_attempts(0).attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_attempts_with_fixed_delay() {
        let (_trigger, shutdown) = shutdown_channel();
        let config = RetryConfig::new("download");
        let calls = std::sync::Mutex::new(Vec::new());

        let result = retry_async(&config, &shutdown, || {
            calls.lock().unwrap().push(Instant::now());
            async { Err::<(), _>("boom") }
        })
        .await;

        assert!(matches!(result, RetryResult::Failed { attempts: 3, .. }));
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_eventual_success() {
        let (_trigger, shutdown) = shutdown_channel();
        let config = RetryConfig::new("upload");
        let count = AtomicU32::new(0);

        let result = retry_async(&config, &shutdown, || {
            let n = count.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err("connection reset")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cancelled_by_shutdown() {
        let (trigger, shutdown) = shutdown_channel();
        let config = RetryConfig::new("download").with_delay(Duration::from_secs(60));
        let count = AtomicU32::new(0);

        let waiter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.trigger();
        });

        let result = retry_async(&config, &shutdown, || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("boom") }
        })
        .await;
        waiter.await.unwrap();

        assert!(matches!(result, RetryResult::Cancelled { attempts: 1 }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
