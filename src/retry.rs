//! Bounded retry with exponential backoff and jitter.
//!
//! The controller is the only component that decides whether a failed remote
//! call is attempted again. Waits between attempts are
//! `base_delay * 2^n + jitter`, where `n` counts retries from zero and jitter
//! is drawn uniformly from `[0, max_jitter)`. Rate-limit responses that carry a
//! `Retry-After` hint never wait less than the hint.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::SteelError;
use crate::logging::{SteelLogger, category};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Retry parameters. `max_attempts` counts every attempt, the first included;
/// zero behaves like one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
    /// Cap on the exponential term, jitter excluded.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Exponential term for the `retry`-th retry (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_secs_f64();
        if bound <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..bound))
    }

    /// Full wait before the next attempt after `err`.
    pub fn delay_for(&self, retry: u32, err: &SteelError) -> Duration {
        let delay = self.backoff(retry) + self.jitter();
        match err.retry_after() {
            Some(hint) => delay.max(hint),
            None => delay,
        }
    }
}

/// Successful result of a retried call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs remote calls under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    logger: SteelLogger,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, logger: SteelLogger) -> Self {
        Self { policy, logger }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `call` receives the one-based attempt number. Cancelling `cancel` drops
    /// the in-flight attempt and returns [`SteelError::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<RetryOutcome<T>, SteelError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SteelError>>,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SteelError::Cancelled);
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SteelError::Cancelled),
                result = call(attempt) => result,
            };

            let err = match result {
                Ok(value) => {
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= max_attempts {
                self.logger.warn(
                    format!("{operation} failed after {attempt} attempts: {err}"),
                    Some(category::RETRY),
                    Some(json!({ "operation": operation, "attempts": attempt, "kind": err.kind() })),
                );
                return Err(SteelError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt - 1, &err);
            self.logger.info(
                format!(
                    "{operation} attempt {attempt}/{max_attempts} failed ({}); retrying in {:.2}s",
                    err.kind(),
                    delay.as_secs_f64()
                ),
                Some(category::RETRY),
                Some(json!({
                    "operation": operation,
                    "attempt": attempt,
                    "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                })),
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SteelError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
