//! Retry Executor: bounded retry-then-abort for phase and gate operations,
//! per §4.7's "retry budget exhausted" transition.

use std::future::Future;

/// Outcome of a retried operation once its attempts are exhausted.
#[derive(Debug, Clone)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` up to `max_attempts` times, returning the first success or the
/// last failure once attempts are exhausted. `max_attempts` of 0 is treated
/// as 1 (always try at least once).
pub async fn retry<T, E, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(attempt, max_attempts = attempts, "operation attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(RetryExhausted {
        attempts,
        last_error: last_error.expect("loop runs at least once"),
    })
}
