//! Retry policy and executor for provider calls
//!
//! Wraps exactly one attempt function (a network call or a stream open) with
//! exponential backoff and jitter. Only errors whose kind is retryable are
//! attempted again; everything else is returned after the first attempt.

use crate::providers::error::ProviderError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 and 1 both mean a single attempt
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Lower bound of the per-attempt jitter multiplier
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,

    /// Upper bound (exclusive) of the per-attempt jitter multiplier
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,

    /// Use the server's Retry-After hint instead of the computed delay
    #[serde(default = "default_true")]
    pub respect_retry_after: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_jitter_min() -> f64 {
    1.0
}
fn default_jitter_max() -> f64 {
    1.5
}
fn default_true() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given total attempt count and default delays
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Policy that performs exactly one attempt
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Set base and maximum delays
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Fix the jitter multiplier range
    pub fn with_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Jitter bounds that are safe to sample from
    ///
    /// Non-finite or negative bounds fall back to the defaults; an inverted
    /// range collapses onto its lower bound.
    pub fn jitter_bounds(&self) -> (f64, f64) {
        let usable = |value: f64| value.is_finite() && value >= 0.0;
        if !usable(self.jitter_min) || !usable(self.jitter_max) {
            return (default_jitter_min(), default_jitter_max());
        }
        (self.jitter_min, self.jitter_max.max(self.jitter_min))
    }

    /// Attempts actually allowed
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay after failed attempt `attempt` (1-indexed)
    ///
    /// `min(base * 2^(attempt-1) * jitter, max)`, or the server's Retry-After
    /// hint capped at `max` when that is enabled and present.
    pub fn calculate_delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        let max_delay_ms = self.max_delay_ms as f64;

        if self.respect_retry_after {
            if let Some(retry_after) = error.retry_after {
                return retry_after.min(self.max_delay());
            }
        }

        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let backoff = self.base_delay_ms as f64 * 2f64.powi(exponent);

        let (jitter_min, jitter_max) = self.jitter_bounds();
        let jitter = if jitter_max > jitter_min {
            rand::thread_rng().gen_range(jitter_min..jitter_max)
        } else {
            jitter_min
        };

        let delay_ms = (backoff * jitter).clamp(0.0, max_delay_ms);
        Duration::from_millis(delay_ms as u64)
    }

    /// Whether attempt number `attempt` (1-indexed) may be followed by another
    pub fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        attempt < self.effective_attempts() && error.is_retryable()
    }
}

/// Lifecycle of one retried call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Success { attempts: u32 },
    Failed { attempts: u32 },
}

/// Result of a retry operation
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    /// The successful result (if any)
    pub result: Option<T>,

    /// Number of attempts made, including the first
    pub attempts: u32,

    /// Delay slept before each retry, in order
    pub delays: Vec<Duration>,

    /// The last error, unmodified (if failed)
    pub final_error: Option<ProviderError>,

    /// All errors encountered, in order
    pub error_history: Vec<ProviderError>,

    /// Terminal state (`Success` or `Failed`)
    pub state: RetryState,
}

impl<T> RetryResult<T> {
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }

    /// Collapse into the success value or the last error
    pub fn into_result(self) -> Result<T, ProviderError> {
        match (self.result, self.final_error) {
            (Some(value), _) => Ok(value),
            (None, Some(error)) => Err(error),
            (None, None) => Err(ProviderError::server("retry loop ended without an outcome")),
        }
    }
}

/// Executor for retry operations
pub struct RetryExecutor {
    policy: RetryPolicy,
    label: String,
}

/// Bookkeeping shared by the blocking and async loops
struct Attempts {
    state: RetryState,
    delays: Vec<Duration>,
    errors: Vec<ProviderError>,
}

impl Attempts {
    fn new() -> Self {
        Self {
            state: RetryState::Idle,
            delays: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn transition(&mut self, label: &str, next: RetryState) {
        debug!(call = %label, from = ?self.state, to = ?next, "retry state");
        self.state = next;
    }

    fn finish<T>(
        mut self,
        label: &str,
        attempt: u32,
        outcome: Result<T, ProviderError>,
    ) -> RetryResult<T> {
        match outcome {
            Ok(value) => {
                self.transition(label, RetryState::Success { attempts: attempt });
                RetryResult {
                    result: Some(value),
                    attempts: attempt,
                    delays: self.delays,
                    final_error: None,
                    error_history: self.errors,
                    state: self.state,
                }
            }
            Err(error) => {
                self.transition(label, RetryState::Failed { attempts: attempt });
                warn!(
                    call = %label,
                    attempts = attempt,
                    kind = %error.kind,
                    "giving up: {}", error
                );
                RetryResult {
                    result: None,
                    attempts: attempt,
                    delays: self.delays,
                    final_error: Some(error),
                    error_history: self.errors,
                    state: self.state,
                }
            }
        }
    }
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy
    pub fn new(mut policy: RetryPolicy) -> Self {
        let (jitter_min, jitter_max) = policy.jitter_bounds();
        if (jitter_min, jitter_max) != (policy.jitter_min, policy.jitter_max) {
            warn!(
                jitter_min = policy.jitter_min,
                jitter_max = policy.jitter_max,
                "unusable jitter range, using [{}, {})",
                jitter_min,
                jitter_max
            );
            policy.jitter_min = jitter_min;
            policy.jitter_max = jitter_max;
        }
        Self {
            policy,
            label: "call".to_string(),
        }
    }

    /// Name used in log lines, e.g. `openai/gpt-4o`
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what follows a failed attempt: `Some(delay)` to retry
    fn next_delay(&self, attempt: u32, error: &ProviderError) -> Option<Duration> {
        if !self.policy.should_retry(error, attempt) {
            return None;
        }
        let delay = self.policy.calculate_delay(attempt, error);
        warn!(
            call = %self.label,
            attempt,
            kind = %error.kind,
            delay_ms = delay.as_millis() as u64,
            "attempt failed, retrying"
        );
        Some(delay)
    }

    /// Execute an async operation with retry logic
    pub async fn execute<F, T, Fut>(&self, mut operation: F) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut book = Attempts::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            book.transition(&self.label, RetryState::Attempting { attempt });

            match operation().await {
                Ok(value) => return book.finish(&self.label, attempt, Ok(value)),
                Err(error) => {
                    book.errors.push(error.clone());
                    let Some(delay) = self.next_delay(attempt, &error) else {
                        return book.finish(&self.label, attempt, Err(error));
                    };
                    book.transition(&self.label, RetryState::Retrying { attempt, delay });
                    book.delays.push(delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Execute a blocking operation with retry logic, sleeping the calling thread
    pub fn execute_blocking<F, T>(&self, mut operation: F) -> RetryResult<T>
    where
        F: FnMut() -> Result<T, ProviderError>,
    {
        let mut book = Attempts::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            book.transition(&self.label, RetryState::Attempting { attempt });

            match operation() {
                Ok(value) => return book.finish(&self.label, attempt, Ok(value)),
                Err(error) => {
                    book.errors.push(error.clone());
                    let Some(delay) = self.next_delay(attempt, &error) else {
                        return book.finish(&self.label, attempt, Err(error));
                    };
                    book.transition(&self.label, RetryState::Retrying { attempt, delay });
                    book.delays.push(delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
