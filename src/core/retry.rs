// src/core/retry.rs

//! Retry configuration and logic.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::core::error::ProbeError;

/// Bounded exponential backoff for transient probe failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before attempt number `attempt` (0-indexed). The first attempt
    /// never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter {
            // Deterministic golden-ratio jitter in [0.5, 1.0).
            let factor = 0.5 + (attempt as f64 * 0.618_033_988_749_895) % 0.5;
            capped * factor
        } else {
            capped
        };
        Duration::from_millis(delay as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Runs `operation` until it succeeds, fails permanently, runs out of
/// attempts, or the next backoff would overrun `deadline`.
pub async fn retry<F, Fut, T>(
    policy: &RetryPolicy,
    deadline: Instant,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ProbeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || !policy.should_retry(attempt) {
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt);
                if Instant::now() + delay >= deadline {
                    debug!(operation = operation_name, "No time left for another attempt.");
                    return Err(e);
                }
                debug!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Retrying operation"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::default();
        for attempt in 1..6 {
            let unjittered = policy.clone().with_jitter(false).delay_for_attempt(attempt);
            let jittered = policy.delay_for_attempt(attempt);
            assert!(jittered <= unjittered);
            assert!(jittered >= unjittered / 2);
        }
    }

    #[tokio::test]
    async fn retries_network_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_policy(3), far_deadline(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProbeError::Network("reset".into()))
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast_policy(2), far_deadline(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::Network("down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast_policy(5), far_deadline(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::Unsupported("ip target".into()))
        })
        .await;
        assert_eq!(result, Err(ProbeError::Unsupported("ip target".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_when_backoff_would_pass_deadline() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_secs(5))
            .with_jitter(false);
        let deadline = Instant::now() + Duration::from_millis(50);
        let result: Result<(), _> = retry(&policy, deadline, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::Network("slow".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
