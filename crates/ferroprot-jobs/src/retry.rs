//! One retry policy shared by every remote call: exponential backoff bounded by
//! a maximum delay, a fixed attempt budget, and a caller-supplied predicate that
//! decides which errors are worth another attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `1` disables retries.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

/// The last error once the attempt budget is spent or a non-retryable error occurs.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay }
    }

    pub fn no_delay(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    pub async fn run<T, E, F, Fut, P>(&self, op_name: &str, retryable: P, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> Option<Option<Duration>>,
        E: Display,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let hint = match retryable(&err) {
                        Some(hint) if attempt < self.max_attempts => hint,
                        _ => return Err(RetryExhausted { attempts: attempt, error: err }),
                    };
                    let delay = hint.unwrap_or_else(|| self.delay_for(attempt)).min(self.max_delay.max(self.base_delay));
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(4), Duration::from_millis(800));
        assert_eq!(p.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(64), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::no_delay(5);
        let out: Result<u32, RetryExhausted<String>> = p
            .run("op", |_e: &String| Some(None), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("fail {n}")) } else { Ok(n) }
            })
            .await;
        assert_eq!(tokio_test::assert_ok!(out), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::no_delay(3);
        let out: Result<(), RetryExhausted<String>> = p
            .run("op", |_e: &String| Some(None), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        let err = out.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::no_delay(5);
        let out: Result<(), RetryExhausted<String>> = p
            .run("op", |_e: &String| None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad request".to_string())
            })
            .await;
        assert_eq!(out.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
