//! Retry and timeout policy
//!
//! Two independent layers:
//! - [`CommandPolicy`] polls a single command until it matches or its
//!   budget runs out.
//! - [`TestRetryPolicy`] decides how many attempts a whole test gets.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::trace;

use crate::config::{HarnessConfig, RunMode};
use crate::error::E2eResult;

/// Result of one probe of a polled command
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// Condition met
    Ready(T),
    /// Condition not met yet; carries what was observed
    Pending(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Matched { value: T, polls: u32 },
    TimedOut { last_observed: String, polls: u32 },
}

/// Intra-command polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl CommandPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self { timeout, ..*self }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Probe until ready or the budget elapses.
    ///
    /// The probe always runs at least once. Engine errors end polling
    /// immediately; only `Pending` is retried.
    pub async fn poll<T, F, Fut>(&self, mut probe: F) -> E2eResult<PollOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<Probe<T>>>,
    {
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            match probe().await? {
                Probe::Ready(value) => return Ok(PollOutcome::Matched { value, polls }),
                Probe::Pending(observed) => {
                    let elapsed = start.elapsed();
                    if elapsed >= self.timeout {
                        trace!("Gave up after {} polls, last observed {}", polls, observed);
                        return Ok(PollOutcome::TimedOut {
                            last_observed: observed,
                            polls,
                        });
                    }
                    sleep(self.interval.min(self.timeout - elapsed)).await;
                }
            }
        }
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(8000),
            interval: Duration::from_millis(50),
        }
    }
}

/// Whole-test retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRetryPolicy {
    pub retries: u32,
}

impl TestRetryPolicy {
    /// Budget for `mode`, replaced by a per-test override when present
    pub fn for_test(config: &HarnessConfig, mode: RunMode, override_retries: Option<u32>) -> Self {
        Self {
            retries: override_retries.unwrap_or_else(|| config.retries_for(mode)),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether another attempt follows a non-passing attempt `attempt` (1-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> CommandPolicy {
        CommandPolicy::new(Duration::from_millis(100), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_poll_returns_on_first_match() {
        let outcome = fast()
            .poll(|| async { Ok(Probe::Ready(7)) })
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Matched { value: 7, polls: 1 });
    }

    #[tokio::test]
    async fn test_poll_retries_until_match() {
        let calls = AtomicU32::new(0);
        let outcome = fast()
            .poll(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Ok(Probe::Pending(format!("seen {}", n)))
                    } else {
                        Ok(Probe::Ready(n))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Matched { value: 3, polls: 3 });
    }

    #[tokio::test]
    async fn test_poll_times_out_with_last_observation() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let outcome: PollOutcome<()> = fast()
            .poll(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Probe::Pending(format!("value {}", n))) }
            })
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        match outcome {
            PollOutcome::TimedOut { last_observed, polls } => {
                assert!(polls > 1);
                assert_eq!(last_observed, format!("value {}", polls - 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_propagates_engine_errors() {
        let result: E2eResult<PollOutcome<()>> = fast()
            .poll(|| async { Err(crate::error::E2eError::Playwright("crashed".into())) })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_budget_by_mode_and_override() {
        let config = HarnessConfig::default();
        let batch = TestRetryPolicy::for_test(&config, RunMode::Batch, None);
        assert_eq!(batch.max_attempts(), 2);
        assert!(batch.should_retry(1));
        assert!(!batch.should_retry(2));

        let interactive = TestRetryPolicy::for_test(&config, RunMode::Interactive, None);
        assert_eq!(interactive.max_attempts(), 1);
        assert!(!interactive.should_retry(1));

        let overridden = TestRetryPolicy::for_test(&config, RunMode::Interactive, Some(3));
        assert_eq!(overridden.max_attempts(), 4);
    }
}
