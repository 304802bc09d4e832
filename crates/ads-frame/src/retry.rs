//! Bounded retry and timeout combinators

use std::future::Future;
use std::time::Duration;

use ads_core::TimeoutError;

/// Fixed-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Every attempt failed; `last` is the final error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: Option<E>,
}

/// Run `op` until it succeeds or the policy runs out. `op` receives the
/// zero-based attempt number. The delay is slept between attempts only.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last = None;

    for attempt in 0..policy.attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay).await;
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                log::trace!("Attempt {}/{} failed: {}", attempt + 1, policy.attempts, e);
                last = Some(e);
            }
        }
    }

    Err(Exhausted {
        attempts: policy.attempts,
        last,
    })
}

/// Race `future` against an optional deadline.
pub async fn with_timeout<F>(label: &str, after: Option<Duration>, future: F) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    match after {
        Some(after) => tokio::time::timeout(after, future)
            .await
            .map_err(|_| TimeoutError {
                request: label.to_string(),
                after,
            }),
        None => Ok(future.await),
    }
}
