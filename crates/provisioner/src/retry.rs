//! Retry loop shared by the readiness probe and state persistence.
//!
//! Both loops must stop when the job is cancelled, so every wait races the
//! cancellation token. Finalization work can ask for its first attempt to run
//! to completion regardless, see [`RetryPolicy::finishing_first_attempt`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{error, warn};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub interval: Duration,
    /// Upper bound for the delay once backoff kicks in
    pub max_interval: Duration,
    /// 1.0 keeps the interval fixed
    pub backoff_multiplier: f64,
    /// Give up once the next wait would end past this much elapsed time
    pub deadline: Option<Duration>,
    /// Wait one interval before the first attempt as well
    pub delay_first: bool,
    /// Make the first attempt even when already cancelled, and let it finish
    pub finish_first: bool,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            max_interval: interval,
            backoff_multiplier: 1.0,
            deadline: None,
            delay_first: false,
            finish_first: false,
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self::fixed(0, interval)
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self.max_interval = max_interval.max(self.interval);
        self
    }

    pub fn delaying_first_attempt(mut self) -> Self {
        self.delay_first = true;
        self
    }

    /// Cancellation then only stops the retries, never the first attempt.
    pub fn finishing_first_attempt(mut self) -> Self {
        self.finish_first = true;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.max_attempts > 0 || self.deadline.is_some()
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.backoff_multiplier).min(self.max_interval)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// The attempt or time budget ran out; carries the last error
    Exhausted { attempts: u32, last: E },
    /// The operation failed with an error that retrying cannot fix
    Permanent { attempts: u32, error: E },
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, runs out of budget
/// or `cancel` fires.
pub async fn retry<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    is_transient: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut delay = policy.interval;

    if policy.delay_first && !wait(cancel, delay).await && !policy.finish_first {
        return Err(RetryError::Cancelled { attempts: 0 });
    }

    loop {
        let guaranteed = attempt == 0 && policy.finish_first;
        if cancel.is_cancelled() && !guaranteed {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let result = if guaranteed {
            operation(attempt).await
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
                result = operation(attempt) => result,
            }
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if !is_transient(&err) => {
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error: err,
                })
            }
            Err(err) => err,
        };

        let out_of_attempts = policy.max_attempts > 0 && attempt >= policy.max_attempts;
        let past_deadline = policy
            .deadline
            .is_some_and(|deadline| started.elapsed() + delay > deadline);
        if out_of_attempts || past_deadline {
            error!("{operation_name} failed after {attempt} attempts: {err}");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        warn!(
            "{operation_name} attempt {attempt} failed: {err}, retrying in {}s",
            delay.as_secs_f64()
        );
        if !wait(cancel, delay).await {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        delay = policy.next_delay(delay);
    }
}

/// Sleeps for `delay`; false when cancelled first.
async fn wait(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn always(_: &String) -> bool {
        true
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_exhausts() {
        let policy = RetryPolicy::fixed(4, Duration::from_secs(5));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = retry(&policy, "probe", &CancellationToken::new(), always, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("unreachable".to_string()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_first_counts_every_interval() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5)).delaying_first_attempt();
        let started = Instant::now();
        let result: Result<(), _> = retry(&policy, "probe", &CancellationToken::new(), always, |_| async {
            Err("down".to_string())
        })
        .await;
        assert_eq!(result.unwrap_err().attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(20));
        let value = retry(&policy, "persist", &CancellationToken::new(), always, |attempt| async move {
            if attempt < 3 {
                Err(format!("attempt {attempt} failed"))
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_immediately() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(1));
        let result: Result<(), _> = retry(
            &policy,
            "persist",
            &CancellationToken::new(),
            |e: &String| e != "conflict",
            |_| async { Err("conflict".to_string()) },
        )
        .await;
        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_unbounded_loop() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(20));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(50)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = retry(&policy, "persist", &cancel, always, |_| async {
            Err("backend down".to_string())
        })
        .await;
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 3 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_survives_cancellation() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(20)).finishing_first_attempt();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let value = retry(&policy, "persist", &cancel, always, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>(attempt) }
        })
        .await
        .unwrap();
        assert_eq!(value, 1);

        let result: Result<(), _> = retry(&policy, "persist", &cancel, always, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("backend down".to_string()) }
        })
        .await;
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_unbounded_policy() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(10))
            .with_deadline(Some(Duration::from_secs(25)));
        assert!(policy.is_bounded());
        let result: Result<(), _> = retry(&policy, "probe", &CancellationToken::new(), always, |_| async {
            Err("down".to_string())
        })
        .await;
        // attempts at t=0, 10, 20; the next wait would end at 30 > 25
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(2))
            .with_backoff(2.0, Duration::from_secs(5));
        assert_eq!(policy.next_delay(Duration::from_secs(2)), Duration::from_secs(4));
        assert_eq!(policy.next_delay(Duration::from_secs(4)), Duration::from_secs(5));
    }
}
