use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fixed-interval bounded retry for "wait until the dependency answers" loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32, last: E },

    #[error("cancelled")]
    Cancelled,

    #[error("retry policy allows no attempts")]
    NoAttempts,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Four attempts, 500ms apart.
    pub const fn readiness() -> Self {
        Self::new(4, Duration::from_millis(500))
    }

    /// Runs `op` until it succeeds or the attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Attempts start `interval`
    /// apart and time spent inside an attempt counts toward that interval, so
    /// nothing sleeps after the last one. Cancelling `cancel` aborts both a
    /// pending attempt and a sleep.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last = None;

        for attempt in 1..=self.attempts {
            let next = Instant::now() + self.interval;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = op(attempt) => outcome,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(attempt, attempts = self.attempts, "attempt failed");
                    last = Some(err);
                }
            }

            if attempt < self.attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep_until(next) => {}
                }
            }
        }

        match last {
            Some(last) => Err(RetryError::Exhausted {
                attempts: self.attempts,
                last,
            }),
            None => Err(RetryError::NoAttempts),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::readiness()
    }
}
