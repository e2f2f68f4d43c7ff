use crate::client::executor::RequestOptions;
use crate::Error;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Internal decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Retry policy of the HTTP executor.
///
/// - `max_attempts` counts the first attempt too.
/// - Delay before attempt n+1 is `backoff_factor * 2^(n-1)` seconds plus up to
///   `jitter` random seconds, capped at `max_delay`.
/// - A zero `backoff_factor` retries immediately.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub jitter: f64,
    pub max_delay: Duration,
    pub retry_err_codes: HashSet<i64>,
}

impl RetryPolicy {
    pub fn new(
        options: &RequestOptions,
        retry_err_codes: &HashSet<i64>,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts: options.retry_count.max(1),
            backoff_factor: options.backoff_factor.max(0.0),
            jitter: 0.0,
            max_delay,
            retry_err_codes: retry_err_codes.clone(),
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
        self
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.backoff_factor == 0.0 {
            return Duration::ZERO;
        }
        let mut secs = self.backoff_factor * 2f64.powi(attempt.min(30) as i32);
        if self.jitter > 0.0 {
            secs += rand::thread_rng().gen_range(0.0..self.jitter);
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether this error is worth another attempt at all.
    pub fn is_retryable(&self, err: &Error) -> bool {
        match err {
            Error::Transport(_) => true,
            Error::Api { code, .. } => self.retry_err_codes.contains(code),
            _ => false,
        }
    }

    /// Decide what to do next after an attempt failed.
    ///
    /// `attempt` is 0-based (first failure => attempt=0).
    pub fn decide(&self, err: &Error, attempt: u32) -> Decision {
        if self.is_retryable(err) && attempt + 1 < self.max_attempts {
            return Decision::Retry {
                delay: self.backoff_delay(attempt),
            };
        }
        Decision::Fail
    }
}
