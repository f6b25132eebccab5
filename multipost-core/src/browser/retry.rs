use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetrySection;

use super::error::BrowserResult;

/// Bounded attempts with a fixed backoff, for steps that race the page's own
/// rendering (a publish button that appears a moment after the form settles).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Duration,
    jitter_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetrySection::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetrySection) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            jitter_ms: config.jitter_ms,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    fn delay(&self) -> Duration {
        if self.jitter_ms == 0 {
            self.backoff
        } else {
            let jitter = rand::thread_rng().gen_range(0..=self.jitter_ms);
            self.backoff + Duration::from_millis(jitter)
        }
    }

    /// Runs `operation` until it succeeds or `max_attempts` is reached, in
    /// which case the last error is returned. `operation` receives the
    /// zero-based attempt index.
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> BrowserResult<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = BrowserResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    attempt += 1;
                    warn!(
                        step = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        return Err(error);
                    }
                    let delay = self.delay();
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::browser::error::BrowserError;

    fn policy(max_attempts: usize, backoff_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetrySection {
            max_attempts,
            backoff_ms,
            jitter_ms: 0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_at_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let started = Instant::now();
        let outcome = policy(3, 2_000)
            .run("publish control", move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(BrowserError::Script("not rendered".into()))
                    } else {
                        Ok("clicked")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, "clicked");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_aborts_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let started = Instant::now();
        let result = policy(3, 2_000)
            .run("publish control", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(BrowserError::Script("missing".into())) }
            })
            .await;
        assert!(matches!(result, Err(BrowserError::Script(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // No backoff after the final attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(policy(0, 10).max_attempts(), 1);
    }
}
