//! Retry utilities for resilient operations
//!
//! A [`RetryPolicy`] is a plain value describing how often and how patiently to
//! retry; [`with_retry`] and [`with_retry_if`] execute any async operation under
//! such a policy, independent of what is being retried.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Computes the jitter added on top of a backoff delay
pub type JitterFn = fn(Duration) -> Duration;

/// Random jitter of up to 25% of the computed delay
pub fn quarter_jitter(delay: Duration) -> Duration {
    let cap = delay.as_secs_f64() * 0.25;
    if cap <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=cap))
}

/// No jitter; useful for deterministic tests
pub fn no_jitter(_delay: Duration) -> Duration {
    Duration::ZERO
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first (never below 1)
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each further attempt
    pub base_delay: Duration,

    /// Caps exponential growth
    pub max_delay: Duration,

    /// Extra randomised delay added to each backoff
    pub jitter_fn: JitterFn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_fn: quarter_jitter,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt count and base delay
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Default::default()
        }
    }

    /// Replace the jitter function
    pub fn with_jitter(mut self, jitter_fn: JitterFn) -> Self {
        self.jitter_fn = jitter_fn;
        self
    }

    /// Replace the delay cap
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Backoff before retrying after failed attempt `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        base + (self.jitter_fn)(base)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Progress of one retried call; dropped on success or final failure
///
/// `last_error` holds the failure being retried, so a later success can report
/// what it recovered from.
#[derive(Debug)]
pub struct RetryState<E> {
    pub attempt: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub last_error: Option<E>,
}

impl<E> RetryState<E> {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.attempts(),
            base_delay: policy.base_delay,
            last_error: None,
        }
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Execute an operation with retry logic and exponential backoff
///
/// Returns `Ok(T)` on success, or the last error once all attempts fail.
///
/// # Example
///
/// ```no_run
/// use pollwire::utils::retry::{with_retry, RetryPolicy};
/// use std::time::Duration;
///
/// # async fn fetch_data() -> Result<String, std::io::Error> { Ok("data".into()) }
/// #[tokio::main]
/// async fn main() -> Result<(), std::io::Error> {
///     let policy = RetryPolicy::new(3, Duration::from_millis(500));
///     let data = with_retry(&policy, || async { fetch_data().await }).await?;
///     Ok(())
/// }
/// ```
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(policy, operation, |_| true).await
}

/// Execute an operation with retry logic, retrying only errors accepted by `should_retry`
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new(policy);

    loop {
        state.attempt += 1;

        match operation().await {
            Ok(result) => {
                if let Some(recovered) = &state.last_error {
                    debug!(
                        attempt = state.attempt,
                        recovered_from = %recovered,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }
                if state.exhausted() {
                    warn!(
                        attempt = state.attempt,
                        max_attempts = state.max_attempts,
                        error = %e,
                        "Operation failed, attempts exhausted"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for(state.attempt);
                warn!(
                    attempt = state.attempt,
                    max_attempts = state.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, will retry"
                );
                state.last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
