//! Backoff policies for transport failures

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum allowed retry attempts
const MAX_RETRY_ATTEMPTS: u32 = 1000;
/// Maximum backoff duration
const MAX_BACKOFF_SECONDS: u64 = 3600;
/// Maximum multiplier
const MAX_MULTIPLIER: f64 = 100.0;

fn validate_max_retries<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u32::deserialize(deserializer)?;
    if value > MAX_RETRY_ATTEMPTS {
        return Err(serde::de::Error::custom(format!(
            "max_retries {} exceeds maximum allowed value {}",
            value, MAX_RETRY_ATTEMPTS
        )));
    }
    Ok(value)
}

fn validate_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = Duration::deserialize(deserializer)?;
    if duration.as_secs() > MAX_BACKOFF_SECONDS {
        return Err(serde::de::Error::custom(format!(
            "duration {:?} exceeds maximum allowed {} seconds",
            duration, MAX_BACKOFF_SECONDS
        )));
    }
    Ok(duration)
}

fn validate_multiplier<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || !(1.0..=MAX_MULTIPLIER).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "backoff_multiplier {} must be finite and between 1.0 and {}",
            value, MAX_MULTIPLIER
        )));
    }
    Ok(value)
}

fn validate_jitter<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "jitter_factor {} must be finite and between 0.0 and 1.0",
            value
        )));
    }
    Ok(value)
}

/// Retry policy configuration with validated bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries; `None` retries until cancelled
    #[serde(default, deserialize_with = "validate_optional_retries")]
    pub max_retries: Option<u32>,
    /// Initial backoff duration
    #[serde(deserialize_with = "validate_duration")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(deserialize_with = "validate_duration")]
    pub max_backoff: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential)
    #[serde(deserialize_with = "validate_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(deserialize_with = "validate_jitter")]
    pub jitter_factor: f64,
}

fn validate_optional_retries<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "validate_max_retries")] u32);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(v)| v))
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(None, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// Calculate the backoff before retry number `attempt` (1-based)
    pub fn next_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = if attempt > 30 {
            self.max_backoff
        } else {
            let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
            if multiplier.is_finite() && multiplier < 1e6 {
                Duration::from_secs_f64(self.initial_backoff.as_secs_f64() * multiplier)
            } else {
                self.max_backoff
            }
        };

        let capped = base.min(self.max_backoff);
        let jitter = capped.as_secs_f64() * self.jitter_factor * rand::random::<f64>();
        let with_jitter = Duration::from_secs_f64(capped.as_secs_f64() + jitter);

        debug!(attempt, backoff = ?with_jitter, "calculated backoff");
        with_jitter
    }

    /// Check if we should retry after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.map_or(true, |max| attempt < max)
    }

    /// Fixed delay between attempts
    pub fn fixed(max_retries: Option<u32>, backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff: backoff,
            max_backoff: backoff,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Doubling delay with 10% jitter, capped at `max`
    pub fn exponential(max_retries: Option<u32>, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff: initial,
            max_backoff: max,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_backoff > self.max_backoff {
            return Err("Initial backoff cannot exceed max backoff".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("Backoff multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("Jitter factor must be between 0 and 1".to_string());
        }
        Ok(())
    }
}

/// Retry result
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Success after retries
    Success { value: T, attempts: u32 },
    /// Failed after exhausting retries or hitting a permanent error
    Failed { error: E, attempts: u32 },
    /// Cancellation fired while waiting to retry
    Cancelled { attempts: u32 },
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `operation` until it succeeds, `should_retry` rejects the error,
    /// the policy is exhausted, or `cancel` fires during backoff
    pub async fn execute_with_predicate<F, Fut, P, T, E>(
        &self,
        mut operation: F,
        mut should_retry: P,
        cancel: &CancellationToken,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return RetryResult::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    if !self.policy.should_retry(attempt) || !should_retry(&error) {
                        warn!("Operation failed after {} attempts: {}", attempt + 1, error);
                        return RetryResult::Failed {
                            error,
                            attempts: attempt,
                        };
                    }

                    attempt += 1;
                    let backoff = self.policy.next_backoff(attempt);
                    warn!(
                        "Operation failed (attempt {}), retrying in {:?}: {}",
                        attempt, backoff, error
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return RetryResult::Cancelled { attempts: attempt };
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_exponential_backoff() {
        let policy =
            RetryPolicy::exponential(Some(5), Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(policy.next_backoff(0), Duration::ZERO);

        let backoff1 = policy.next_backoff(1);
        assert!(backoff1 >= Duration::from_millis(100));
        assert!(backoff1 < Duration::from_millis(200));

        let backoff2 = policy.next_backoff(2);
        assert!(backoff2 >= Duration::from_millis(200));
        assert!(backoff2 < Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy =
            RetryPolicy::exponential(None, Duration::from_millis(500), Duration::from_secs(30));
        let late = policy.next_backoff(40);
        assert!(late >= Duration::from_secs(30));
        assert!(late <= Duration::from_secs(33));
    }

    #[test]
    fn test_should_retry() {
        let bounded = RetryPolicy::fixed(Some(3), Duration::from_millis(1));
        assert!(bounded.should_retry(2));
        assert!(!bounded.should_retry(3));

        assert!(RetryPolicy::default().should_retry(u32::MAX));
    }

    #[tokio::test]
    async fn test_retry_executor() {
        let executor = RetryExecutor::new(RetryPolicy::fixed(Some(2), Duration::from_millis(10)));
        let count = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result = executor
            .execute_with_predicate(
                || {
                    let count = count.clone();
                    async move {
                        if count.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("temporary error")
                        } else {
                            Ok("success")
                        }
                    }
                },
                |_: &&str| true,
                &cancel,
            )
            .await;

        match result {
            RetryResult::Success { value, attempts } => {
                assert_eq!(value, "success");
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_predicate_stops_on_permanent_error() {
        let executor = RetryExecutor::new(RetryPolicy::fixed(None, Duration::from_millis(1)));
        let cancel = CancellationToken::new();

        let result: RetryResult<(), &str> = executor
            .execute_with_predicate(|| async { Err("permanent") }, |e| *e != "permanent", &cancel)
            .await;

        assert!(matches!(result, RetryResult::Failed { attempts: 0, .. }));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let executor = RetryExecutor::new(RetryPolicy::fixed(None, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: RetryResult<(), &str> = executor
            .execute_with_predicate(|| async { Err("down") }, |_| true, &cancel)
            .await;
        assert!(matches!(result, RetryResult::Cancelled { attempts: 1 }));
    }

    #[test]
    fn test_retry_policy_validation() {
        let valid = r#"{
            "max_retries": 5,
            "initial_backoff": {"secs": 1, "nanos": 0},
            "max_backoff": {"secs": 30, "nanos": 0},
            "backoff_multiplier": 2.0,
            "jitter_factor": 0.1
        }"#;
        assert!(serde_json::from_str::<RetryPolicy>(valid).is_ok());

        let unbounded = r#"{
            "max_retries": null,
            "initial_backoff": {"secs": 1, "nanos": 0},
            "max_backoff": {"secs": 30, "nanos": 0},
            "backoff_multiplier": 2.0,
            "jitter_factor": 0.1
        }"#;
        let policy: RetryPolicy = serde_json::from_str(unbounded).unwrap();
        assert_eq!(policy.max_retries, None);

        let too_many = valid.replace("\"max_retries\": 5", "\"max_retries\": 10000");
        assert!(serde_json::from_str::<RetryPolicy>(&too_many).is_err());

        let too_long = valid.replace("\"secs\": 1,", "\"secs\": 7200,");
        assert!(serde_json::from_str::<RetryPolicy>(&too_long).is_err());

        let bad_jitter = valid.replace("0.1", "1.5");
        assert!(serde_json::from_str::<RetryPolicy>(&bad_jitter).is_err());
    }
}
