//! Bounded retry for notification consumers.
//!
//! Independent of a record's `retry_count`: this only re-runs a handler a
//! few times within one delivery.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// How a retried operation ended.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    /// Every allowed attempt failed.
    Exhausted { attempts: u32, error: E },
    /// A non-transient error; no further attempts were made.
    Aborted { attempts: u32, error: E },
    /// Cancelled while waiting between attempts.
    Interrupted { attempts: u32, error: E },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Aborted { attempts, .. }
            | Self::Interrupted { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Run `operation` until it succeeds, fails non-transiently, runs out of
/// attempts, or `cancel` fires during a pause.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                }
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return RetryOutcome::Aborted {
                attempts: attempt,
                error,
            };
        }
        if attempt >= policy.max_attempts {
            return RetryOutcome::Exhausted {
                attempts: attempt,
                error,
            };
        }

        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            error = %error,
            "Attempt failed, retrying after delay"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return RetryOutcome::Interrupted { attempts: attempt, error };
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky (transient: {})", self.0)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = run_with_retry(policy(3), &CancellationToken::new(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { if attempt < 3 { Err(Flaky(true)) } else { Ok(attempt) } }
        })
        .await;

        assert!(matches!(outcome, RetryOutcome::Succeeded { value: 3, attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), Flaky> =
            run_with_retry(policy(4), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(true)) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 4, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_transient_error_aborts_immediately() {
        let outcome: RetryOutcome<(), Flaky> =
            run_with_retry(policy(5), &CancellationToken::new(), |_| async { Err(Flaky(false)) })
                .await;
        assert!(matches!(outcome, RetryOutcome::Aborted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_the_pause() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let slow = RetryPolicy::new(10, Duration::from_secs(3600));

        let outcome: RetryOutcome<(), Flaky> =
            run_with_retry(slow, &cancel, |_| async { Err(Flaky(true)) }).await;
        assert!(matches!(outcome, RetryOutcome::Interrupted { attempts: 1, .. }));
    }
}
