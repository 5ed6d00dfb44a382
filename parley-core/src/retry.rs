//! Best-effort bounded retry.
//!
//! Runs an async action up to `attempts` times with a fixed delay in between.
//! The final failure is logged and swallowed: callers get `None` and move on.
//! Used for session file cleanup; fits any external call whose failure must not
//! block the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay_ms: u64) -> Self {
        Self {
            attempts,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

pub async fn best_effort<T, E, F, Fut>(operation: &str, policy: RetryPolicy, mut action: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let retries = policy.attempts.max(1) as usize - 1;
    let strategy = FixedInterval::new(policy.delay).take(retries);

    match Retry::spawn(strategy, || action()).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                operation = operation,
                attempts = retries + 1,
                error = %e,
                "Giving up after bounded retries"
            );
            None
        }
    }
}
