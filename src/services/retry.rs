//! Bounded retry with fixed backoff.
//!
//! Used for the upstream proxy refill, page navigation and the selector-level
//! scrape loop. Which errors are worth another attempt is decided by a
//! predicate supplied at the call site.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Pause between consecutive attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }
}

/// The error of the final attempt plus how many attempts were made.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last
    }
}

/// Run `op` until it succeeds, returns an error `should_retry` rejects, or the
/// attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, P>(
    policy: RetryPolicy,
    should_retry: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && should_retry(&e) => {
                tracing::debug!(attempt, max_attempts = attempts, "Attempt failed, retrying");
                if !policy.backoff.is_zero() {
                    sleep(policy.backoff).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(RetryError { attempts: attempt, last: e }),
        }
    }
}
