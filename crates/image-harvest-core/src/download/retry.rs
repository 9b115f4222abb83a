use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use tokio::time::sleep;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::logging::log_download_error;
use crate::session::{Gate, SessionControl};

/// Upper bound of the random jitter added to rate-limit backoff
pub const MAX_JITTER: Duration = Duration::from_secs(1);

/// Cap on the exponent so a large retry count cannot overflow the delay
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// When and how long to wait between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Flat delay after a transient failure other than 429
    pub retry_delay: Duration,
    /// Base of `2^attempt · base` after a 429
    pub backoff_base: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            attempts: config.retries.max(1),
            retry_delay: config.retry_delay(),
            backoff_base: config.backoff_base(),
            max_jitter: MAX_JITTER,
        }
    }

    /// Ceiling on a server's Retry-After, equal to the largest computed backoff before jitter
    pub fn max_backoff(&self) -> Duration {
        self.backoff_base * 2u32.pow(MAX_BACKOFF_EXPONENT)
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, error: &Error, attempt: u32) -> Duration {
        match error {
            Error::RateLimited {
                retry_after: Some(hint),
                ..
            } => (*hint).min(self.max_backoff()),
            Error::RateLimited { .. } => {
                let factor = 2u32.pow(attempt.min(MAX_BACKOFF_EXPONENT));
                self.backoff_base * factor + self.jitter()
            }
            _ => self.retry_delay,
        }
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let millis = self.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }
}

/// Final result of a retried operation plus how many attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Run `attempt_fn` until it succeeds, fails permanently or runs out of attempts.
///
/// Every attempt is preceded by [`SessionControl::wait_if_paused`]. A cancel
/// seen there, or during a backoff sleep, ends the loop with
/// [`Error::Cancelled`]. Backoff sleeps hold no concurrency permit.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    control: &SessionControl,
    url: &str,
    mut attempt_fn: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        if control.wait_if_paused().await == Gate::Stop {
            return RetryOutcome {
                result: Err(Error::Cancelled),
                attempts: attempt,
            };
        }

        attempt += 1;
        let error = match attempt_fn(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(error) => error,
        };

        log_download_error(url, attempt, &error);

        if !error.is_retryable() || attempt >= policy.attempts {
            return RetryOutcome {
                result: Err(error),
                attempts: attempt,
            };
        }

        let delay = policy.delay_for(&error, attempt);
        warn!(
            "Retrying {} in {:?} (attempt {} of {})",
            url,
            delay,
            attempt + 1,
            policy.attempts
        );

        tokio::select! {
            _ = sleep(delay) => {}
            _ = control.cancelled() => {
                debug!("Backoff for {} interrupted by cancel", url);
                return RetryOutcome {
                    result: Err(Error::Cancelled),
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            retry_delay: Duration::from_millis(1),
            backoff_base: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        }
    }

    fn server_error() -> Error {
        Error::Http {
            url: "https://example.com/a.jpg".to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    #[test]
    fn test_delay_for_rate_limit() {
        let policy = RetryPolicy {
            attempts: 3,
            retry_delay: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
            max_jitter: Duration::ZERO,
        };
        let limited = Error::RateLimited {
            url: "u".to_string(),
            retry_after: None,
        };
        assert_eq!(policy.delay_for(&limited, 1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(&limited, 3), Duration::from_millis(800));

        let hinted = Error::RateLimited {
            url: "u".to_string(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(policy.delay_for(&hinted, 1), Duration::from_secs(7));
        assert_eq!(policy.delay_for(&server_error(), 2), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_is_capped() {
        let policy = RetryPolicy {
            attempts: 3,
            retry_delay: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
            max_jitter: Duration::ZERO,
        };
        let day = Error::RateLimited {
            url: "u".to_string(),
            retry_after: Some(Duration::from_secs(86_400)),
        };

        // 100 ms * 2^10
        assert_eq!(policy.max_backoff(), Duration::from_millis(102_400));
        assert_eq!(policy.delay_for(&day, 1), policy.max_backoff());
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            max_jitter: Duration::from_millis(50),
            ..fast_policy(3)
        };
        let limited = Error::RateLimited {
            url: "u".to_string(),
            retry_after: None,
        };
        for _ in 0..100 {
            let delay = policy.delay_for(&limited, 1);
            assert!(delay >= Duration::from_millis(2));
            assert!(delay <= Duration::from_millis(52));
        }
    }

    #[tokio::test]
    async fn test_always_transient_is_attempted_exactly_retries_times() {
        let calls = AtomicU32::new(0);
        let control = SessionControl::new();

        let outcome: RetryOutcome<u64> =
            fetch_with_retry(&fast_policy(4), &control, "https://example.com/a.jpg", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(outcome.result, Err(Error::Http { .. })));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let control = SessionControl::new();

        let outcome: RetryOutcome<u64> =
            fetch_with_retry(&fast_policy(5), &control, "https://example.com/a.jpg", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::Client {
                        url: "https://example.com/a.jpg".to_string(),
                        status: StatusCode::NOT_FOUND,
                    })
                }
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let control = SessionControl::new();

        let outcome = fetch_with_retry(&fast_policy(3), &control, "u", |attempt| async move {
            if attempt == 1 {
                Err(server_error())
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let control = SessionControl::new();
        control.cancel();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<u64> = fetch_with_retry(&fast_policy(3), &control, "u", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;

        assert_eq!(outcome.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(outcome.result, Err(Error::Cancelled)));
    }
}
