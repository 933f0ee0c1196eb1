use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// Fixed-delay, bounded retry for operations that fail before reaching the API.
///
/// Only the transport call is wrapped; HTTP error statuses are answers, not
/// failures, and are never retried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    /// Delay between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Every attempt failed; carries the last error.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds or `max_attempts` is reached.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(%label, attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= max => {
                    warn!(%label, attempt, err = %e, "giving up after final attempt");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    warn!(%label, attempt, err = %e, "API unreachable, retrying");
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
