//! Retry/backoff for remote calls, modelled as an explicit per-request state machine:
//! `Pending -> Retrying(n) -> Succeeded | Failed`.

use crate::errors::ApiError;
use log::{debug, warn};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// No retry is scheduled if its delay would end past this budget.
    pub max_elapsed: Duration,
    /// Random jitter added on top of the base delay, as a percentage of it.
    pub jitter_percent: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(120),
            jitter_percent: 25,
        }
    }
}

#[derive(Debug)]
pub enum RequestState<T> {
    Pending,
    Retrying {
        /// Number of the attempt about to be made.
        attempt: u32,
        delay: Duration,
        last_error: ApiError,
    },
    Succeeded(T),
    Failed(ApiError),
}

impl RetryPolicy {
    /// Base delay before retrying after failed attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let max_jitter = (base.as_millis() as u64).saturating_mul(self.jitter_percent as u64) / 100;
        if max_jitter == 0 {
            return base;
        }
        base.saturating_add(Duration::from_millis(fastrand::u64(0..=max_jitter)))
    }

    /// Decide the next state from the outcome of attempt `attempt`.
    pub fn transition<T>(
        &self,
        attempt: u32,
        elapsed: Duration,
        outcome: Result<T, ApiError>,
    ) -> RequestState<T> {
        let error = match outcome {
            Ok(value) => return RequestState::Succeeded(value),
            Err(e) => e,
        };

        if !error.is_retryable() {
            return RequestState::Failed(error);
        }

        if attempt >= self.max_attempts {
            return RequestState::Failed(ApiError::new(
                error.kind,
                format!("{} (gave up after {attempt} attempts)", error.message),
            ));
        }

        let delay = self.delay_with_jitter(attempt);
        if elapsed.saturating_add(delay) > self.max_elapsed {
            return RequestState::Failed(ApiError::new(
                error.kind,
                format!(
                    "{} (retry budget of {:?} exhausted after {attempt} attempts)",
                    error.message, self.max_elapsed
                ),
            ));
        }

        RequestState::Retrying {
            attempt: attempt + 1,
            delay,
            last_error: error,
        }
    }

    /// Drive `operation` through the state machine until it succeeds or fails for good.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let started = Instant::now();
        let mut state = RequestState::Pending;

        loop {
            state = match state {
                RequestState::Pending => {
                    let outcome = operation().await;
                    self.transition(1, started.elapsed(), outcome)
                }
                RequestState::Retrying {
                    attempt,
                    delay,
                    last_error,
                } => {
                    warn!(
                        "{label} failed ({last_error}); attempt {attempt}/{} in {delay:?}",
                        self.max_attempts
                    );
                    sleep(delay).await;
                    let outcome = operation().await;
                    self.transition(attempt, started.elapsed(), outcome)
                }
                RequestState::Succeeded(value) => {
                    debug!("{label} succeeded");
                    return Ok(value);
                }
                RequestState::Failed(error) => return Err(error),
            };
        }
    }
}
