//! Retry policy for transient failures
//!
//! Aggregate recomputation is idempotent, so a failed attempt can always be
//! repeated. This module supplies the bounded backoff used by both the direct
//! recompute path and the queue workers.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase: delay * attempt
    Linear,
    /// Exponential increase: delay * 2^attempt
    Exponential,
    /// Exponential with jitter to prevent thundering herd
    ExponentialWithJitter,
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt number
    ///
    /// `attempt` is zero-based (0 = first retry).
    pub fn calculate_delay(
        &self,
        attempt: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Duration {
        use rand::Rng;

        let delay = match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Linear => initial_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => {
                initial_delay.saturating_mul(2u32.saturating_pow(attempt))
            }
            BackoffStrategy::ExponentialWithJitter => {
                let base_delay = initial_delay.saturating_mul(2u32.saturating_pow(attempt));
                let jitter =
                    (base_delay.as_millis() as f64 * 0.1 * rand::thread_rng().gen::<f64>()) as u64;
                base_delay.saturating_add(Duration::from_millis(jitter))
            }
        };

        delay.min(max_delay)
    }
}

/// Retry policy configuration
///
/// `max_attempts` counts every attempt including the first, so a value of 1
/// disables retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Initial delay before first retry
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    /// Maximum delay between retries
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Backoff strategy to use
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    /// Create a new retry policy with exponential backoff
    pub fn exponential() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Create a retry policy with fixed delay
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: 4,
            initial_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO).with_max_attempts(1)
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, enable: bool) -> Self {
        self.strategy = if enable {
            BackoffStrategy::ExponentialWithJitter
        } else {
            BackoffStrategy::Exponential
        };
        self
    }

    /// Calculate delay for a specific retry
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.strategy
            .calculate_delay(attempt, self.initial_delay, self.max_delay)
    }

    /// Execute an async operation, retrying every failure
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_context(operation, |_| true)
            .await
            .into_result()
    }

    /// Execute an async operation, retrying only failures `should_retry`
    /// accepts, and report attempt statistics
    pub async fn execute_with_context<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        let mut total_delay = Duration::ZERO;

        loop {
            let outcome = operation().await;
            attempt += 1;

            match outcome {
                Ok(value) => {
                    return RetryResult {
                        result: Ok(value),
                        attempts: attempt,
                        total_duration: start.elapsed(),
                        total_retry_delay: total_delay,
                    };
                }
                Err(err) if attempt < max_attempts && should_retry(&err) => {
                    let delay = self.calculate_delay(attempt - 1);
                    total_delay += delay;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return RetryResult {
                        result: Err(err),
                        attempts: attempt,
                        total_duration: start.elapsed(),
                        total_retry_delay: total_delay,
                    };
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

/// Result of a retry operation with statistics
#[derive(Debug, Clone)]
pub struct RetryResult<T, E> {
    /// Final result (success or failure)
    pub result: Result<T, E>,
    /// Number of attempts made
    pub attempts: u32,
    /// Total duration including retries
    pub total_duration: Duration,
    /// Total time spent waiting between retries
    pub total_retry_delay: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Check if operation succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Check if any retries were performed
    pub fn had_retries(&self) -> bool {
        self.attempts > 1
    }

    /// Get the result
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Serialize durations as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a duration as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize a duration from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy::exponential()
            .with_initial_delay(Duration::from_secs(4))
            .with_max_delay(Duration::from_secs(10));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::exponential().with_jitter(true);
        let delay = policy.calculate_delay(1);
        assert!(delay >= Duration::from_millis(200));
        assert!(delay <= Duration::from_millis(220));
    }

    #[tokio::test]
    async fn test_retry_success_on_eventual_availability() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err("transient failure")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_bounded() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1)).with_max_attempts(3);
        let attempts = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute_with_context(
                || {
                    let attempts = attempts.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("persistent failure")
                    }
                },
                |_| true,
            )
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_stop_immediately() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1));
        let result = policy
            .execute_with_context(|| async { Err::<(), _>("permanent") }, |_| false)
            .await;

        assert_eq!(result.attempts, 1);
        assert!(!result.had_retries());
    }

    #[test]
    fn test_policy_parses_milliseconds_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
            max_attempts = 5
            initial_delay = 50
            max_delay = 2000
            strategy = "linear"
            "#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(150));
    }
}
