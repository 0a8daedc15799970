//! Exponential backoff for forward attempts.

use std::{future::Future, time::Duration};

use observability_deps::tracing::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// How failed forwards are retried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Multiplier applied to the backoff after every retry.
    pub backoff_factor: f64,
    /// Upper bound of a single backoff.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Option<Duration>,
    /// Retries after the first attempt, ignored when `forever` is set.
    pub max_retries: u32,
    /// Retry until the attempt succeeds or the process shuts down.
    pub forever: bool,
    /// Randomize each backoff within `[backoff / 2, backoff)` before it is
    /// capped by `max_backoff`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_backoff: None,
            max_retries: 1,
            forever: false,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// The backoff before retry number `retry`, counted from 1, without
    /// jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_factor.powi(exp);
        let max = self.max_backoff.unwrap_or(Duration::MAX);
        // `try_from_secs_f64` rejects overflowed and non-finite values.
        Duration::try_from_secs_f64(secs).map_or(max, |d| d.min(max))
    }

    fn jittered(&self, backoff: Duration, rng: &mut impl Rng) -> Duration {
        if !self.jitter || backoff.as_nanos() <= 1 {
            return backoff;
        }
        let half = backoff / 2;
        half + rng.gen_range(Duration::ZERO..half)
    }

    /// The wait before retry number `retry` given the wait before the
    /// previous one. Waits never shrink from one retry to the next.
    fn wait(&self, retry: u32, prev: Duration, rng: &mut impl Rng) -> Duration {
        let uncapped = Self {
            max_backoff: None,
            ..*self
        }
        .backoff(retry);
        let max = self.max_backoff.unwrap_or(Duration::MAX);
        self.jittered(uncapped, rng).min(max).max(prev)
    }

    fn may_retry(&self, retry: u32) -> bool {
        self.forever || retry <= self.max_retries
    }
}

/// Runs a fallible async operation under a [`RetryConfig`].
#[derive(Debug, Clone, Copy)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Call `op` until it succeeds, the retries run out, or `shutdown` is
    /// cancelled while backing off. The last error is returned on failure.
    pub async fn attempt<F, Fut, T, E>(&self, shutdown: &CancellationToken, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: std::fmt::Display + Send,
    {
        let mut retry = 0_u32;
        let mut backoff = Duration::ZERO;
        loop {
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            retry = retry.saturating_add(1);
            if !self.config.may_retry(retry) {
                return Err(err);
            }

            backoff = self.config.wait(retry, backoff, &mut rand::thread_rng());
            debug!(retry, ?backoff, error=%err, "attempt failed, backing off");
            tokio::select! {
                _ = shutdown.cancelled() => return Err(err),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
