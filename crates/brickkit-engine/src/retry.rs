//! Retry with exponential backoff and jitter.
//!
//! Transient backend failures (rate limits, 5xx, connection resets,
//! timeouts) are retried; permission and validation failures never are.
//! Backoff doubles per attempt up to a cap, and each delay is stretched
//! by up to a quarter of its own length so concurrent workers retrying
//! the same overloaded backend spread out instead of arriving together.

use std::future::Future;
use std::time::Duration;

use brickkit_core::{Error, Result};

use crate::metrics;

/// Backoff floor.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Backoff cap.
const BACKOFF_MAX: Duration = Duration::from_secs(8);

/// Environment variable overriding the default retry count.
pub const MAX_RETRIES_VAR: &str = "BRICKKIT_MAX_RETRIES";

/// Retry behavior of the reconciler's backend calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts beyond the first.
    pub max_retries: u32,
    /// Per-call timeout for control-plane operations.
    pub sdk_timeout: Duration,
    /// Per-call timeout for SQL operations.
    pub sql_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let max_retries = std::env::var(MAX_RETRIES_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(3);
        Self {
            max_retries,
            sdk_timeout: Duration::from_secs(60),
            sql_timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` under the policy, retrying transient failures.
    ///
    /// The future produced by `operation` is bounded by `timeout`; an
    /// elapsed deadline is classified transient and re-enters the retry
    /// loop.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or immediately
    /// for non-transient errors.
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        timeout: Duration,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = BACKOFF_BASE;
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(
                    operation_name,
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                )),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    metrics::record_retry(operation_name);
                    let delay = with_jitter(backoff.min(BACKOFF_MAX));
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "retries exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Stretches a delay by +0% to +25% of its own length.
///
/// The fraction is seeded from the clock's sub-second nanos, which is
/// plenty of spread for retry staggering and keeps `rand` out of the
/// dependency tree. Scaling proportionally (rather than adding a fixed
/// bound) keeps the jitter meaningful across the whole backoff range.
fn with_jitter(delay: Duration) -> Duration {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let fraction = f64::from(nanos) / 1_000_000_000.0;
    delay.mul_f64(fraction.mul_add(0.25, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            sdk_timeout: Duration::from_secs(5),
            sql_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = policy(3)
            .run("grants.update", Duration::from_secs(5), move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::transient("rate limited"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = policy(3)
            .run("catalogs.update", Duration::from_secs(5), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::permission_denied("no MANAGE on catalog"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_with_last_error() {
        let result: Result<()> = policy(2)
            .run("schemas.get", Duration::from_secs(5), || async {
                Err(Error::transient("503"))
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_enter_the_retry_path() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = policy(1)
            .run("sql.execute", Duration::from_millis(10), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
