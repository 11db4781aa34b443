//! Cancellable fixed-interval poll loop with a configurable failure policy
//!
//! Every COD loop (status, identifiers, active imports) runs through
//! [`poll`]. The attempt future is raced against the cancellation token, so a
//! cancelled loop drops its in-flight request instead of waiting for it.

use braggly_common::config::{ErrorMode, PollingConfig};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::BackendError;

/// The loops a COD session runs through [`poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLoop {
    Status,
    Identifiers,
    ActiveImports,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    mode: ErrorMode,
    base_delay: Duration,
    max_delay: Duration,
    max_consecutive_failures: Option<u32>,
}

impl RetryPolicy {
    /// Give up on the first failure
    pub fn stop() -> Self {
        Self {
            mode: ErrorMode::Stop,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_consecutive_failures: None,
        }
    }

    /// Retry with exponential backoff starting at `base_delay`
    ///
    /// `max_consecutive_failures = None` retries forever.
    pub fn retry(
        base_delay: Duration,
        max_delay: Duration,
        max_consecutive_failures: Option<u32>,
    ) -> Self {
        Self {
            mode: ErrorMode::Retry,
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_consecutive_failures,
        }
    }

    /// Policy for `kind` polling every `interval`
    pub fn from_config(config: &PollingConfig, kind: PollLoop, interval: Duration) -> Self {
        match (config.on_error, kind) {
            (ErrorMode::Stop, _) | (ErrorMode::Legacy, PollLoop::Status) => Self::stop(),
            // Fixed interval, no cap
            (ErrorMode::Legacy, _) => Self::retry(interval, interval, None),
            (ErrorMode::Retry, _) => Self::retry(
                interval,
                config.backoff_max(),
                config.max_consecutive_failures,
            ),
        }
    }

    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    /// Delay before the next attempt after `failures` consecutive failures
    ///
    /// `None` means the loop gives up.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if self.mode == ErrorMode::Stop || failures == 0 {
            return None;
        }
        if let Some(max) = self.max_consecutive_failures {
            if failures >= max {
                return None;
            }
        }

        let exponent = (failures - 1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        Some(delay.min(self.max_delay))
    }
}

/// Result of one successful attempt
#[derive(Debug)]
pub enum Step<T> {
    /// Poll again after the interval
    Continue,
    /// Terminal state reached
    Done(T),
}

/// How a poll loop ended
#[derive(Debug)]
pub enum PollOutcome<T> {
    Completed(T),
    Cancelled,
    Failed(BackendError),
}

/// Errors that no amount of retrying will fix
fn is_fatal(error: &BackendError) -> bool {
    matches!(
        error,
        BackendError::Unconfigured | BackendError::Unauthorized | BackendError::InvalidRequest(_)
    )
}

/// Run `attempt` every `interval` until it returns [`Step::Done`], the
/// policy gives up, or `cancel` fires
pub async fn poll<T, F, Fut>(
    label: &str,
    interval: Duration,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Step<T>, BackendError>>,
{
    let mut failures: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(poller = %label, "Poll loop cancelled during request");
                return PollOutcome::Cancelled;
            }
            result = attempt() => result,
        };

        let delay = match result {
            Ok(Step::Done(value)) => return PollOutcome::Completed(value),
            Ok(Step::Continue) => {
                failures = 0;
                interval
            }
            Err(e) => {
                failures += 1;
                let next = if is_fatal(&e) {
                    None
                } else {
                    policy.next_delay(failures)
                };
                match next {
                    Some(delay) => {
                        warn!(
                            poller = %label,
                            failures,
                            retry_in_ms = delay.as_millis() as u64,
                            "Poll attempt failed: {}",
                            e
                        );
                        delay
                    }
                    None => {
                        warn!(poller = %label, failures, "Poll loop giving up: {}", e);
                        return PollOutcome::Failed(e);
                    }
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(poller = %label, "Poll loop cancelled while waiting");
                return PollOutcome::Cancelled;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_stop_policy_never_retries() {
        let policy = RetryPolicy::stop();
        assert_eq!(policy.next_delay(1), None);
        assert_eq!(policy.mode(), ErrorMode::Stop);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::retry(Duration::from_millis(500), Duration::from_secs(3), None);
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_secs(3)));
        assert_eq!(policy.next_delay(40), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_max_consecutive_failures() {
        let policy = RetryPolicy::retry(Duration::from_millis(10), Duration::from_secs(1), Some(3));
        assert!(policy.next_delay(2).is_some());
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_policy_from_config() {
        let interval = Duration::from_millis(500);
        let mut config = PollingConfig::default();
        let policy = RetryPolicy::from_config(&config, PollLoop::Status, interval);
        assert_eq!(policy.mode(), ErrorMode::Retry);

        config.on_error = ErrorMode::Stop;
        for kind in [PollLoop::Status, PollLoop::Identifiers, PollLoop::ActiveImports] {
            assert_eq!(RetryPolicy::from_config(&config, kind, interval), RetryPolicy::stop());
        }
    }

    #[test]
    fn test_legacy_policy_per_loop() {
        let interval = Duration::from_millis(500);
        let mut config = PollingConfig::default();
        config.on_error = ErrorMode::Legacy;

        let status = RetryPolicy::from_config(&config, PollLoop::Status, interval);
        assert_eq!(status.next_delay(1), None);

        // Identifier loop: same interval after every failure, never gives up
        let ids = RetryPolicy::from_config(&config, PollLoop::Identifiers, interval);
        assert_eq!(ids.next_delay(1), Some(interval));
        assert_eq!(ids.next_delay(6), Some(interval));
        assert_eq!(ids.next_delay(1000), Some(interval));

        let imports = RetryPolicy::from_config(&config, PollLoop::ActiveImports, interval);
        assert_eq!(imports, ids);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_done() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::stop();

        let counter = calls.clone();
        let outcome = poll("test", Duration::from_millis(500), &policy, &cancel, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 3 {
                    Ok(Step::Done(n))
                } else {
                    Ok(Step::Continue)
                }
            }
        })
        .await;

        assert!(matches!(outcome, PollOutcome::Completed(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_policy_fails_on_first_error() {
        let cancel = CancellationToken::new();
        let outcome: PollOutcome<()> = poll(
            "test",
            Duration::from_millis(500),
            &RetryPolicy::stop(),
            &cancel,
            || async { Err(BackendError::Network("refused".into())) },
        )
        .await;
        assert!(matches!(outcome, PollOutcome::Failed(BackendError::Network(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::retry(Duration::from_millis(100), Duration::from_secs(1), Some(5));

        let counter = calls.clone();
        let outcome = poll("test", Duration::from_millis(100), &policy, &cancel, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 {
                    Err(BackendError::Status {
                        status: 503,
                        body: String::new(),
                    })
                } else {
                    Ok(Step::Done(n))
                }
            }
        })
        .await;

        assert!(matches!(outcome, PollOutcome::Completed(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_is_fatal_even_with_retry() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::retry(Duration::from_millis(100), Duration::from_secs(1), None);
        let outcome: PollOutcome<()> = poll("test", Duration::from_millis(100), &policy, &cancel, || async {
            Err(BackendError::Unauthorized)
        })
        .await;
        assert!(matches!(outcome, PollOutcome::Failed(BackendError::Unauthorized)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_request() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::stop();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome: PollOutcome<()> = poll("test", Duration::from_millis(500), &policy, &cancel, || async {
            // Never answers
            std::future::pending::<Result<Step<()>, BackendError>>().await
        })
        .await;
        assert!(matches!(outcome, PollOutcome::Cancelled));
    }
}
