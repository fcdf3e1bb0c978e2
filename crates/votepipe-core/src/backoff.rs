//! Reconnect-with-backoff executor.
//!
//! [`Backoff::run`] retries a connection-establishing operation with exponential delay
//! and per-attempt jitter until it succeeds, the error is classified as non-retryable,
//! or the retry budget is spent. Attempt 0 runs immediately; attempt `n` is preceded by
//! a pause of `(2^(n-1) + jitter) * time_factor`.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retries after the initial attempt (6 attempts in total, slightly over a minute).
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Time unit multiplier applied to `2^attempt + jitter`.
pub const DEFAULT_TIME_FACTOR: Duration = Duration::from_millis(1000);

/// Exponents above this are clamped; the resulting delay is already days long.
const MAX_EXPONENT: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub time_factor: Duration,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            time_factor: DEFAULT_TIME_FACTOR,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BackoffConfig {
    pub fn new(time_factor: Duration, max_retries: u32) -> Self {
        Self {
            time_factor,
            max_retries,
        }
    }
}

/// A negative attempt counter reached the strategy. Always a caller bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid attempt counter: {0} (did you forget to exit a loop?)")]
pub struct InvalidAttempt(pub i64);

#[derive(Debug, thiserror::Error)]
pub enum BackoffError<E> {
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("non-retryable error: {0}")]
    Rejected(#[source] E),

    #[error(transparent)]
    InvalidAttempt(#[from] InvalidAttempt),
}

impl<E> BackoffError<E> {
    /// The error returned by the last attempt, if any attempt ran.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            BackoffError::Exhausted { source, .. } => Some(source),
            BackoffError::Rejected(source) => Some(source),
            BackoffError::InvalidAttempt(_) => None,
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            BackoffError::Exhausted { source, .. } => Some(source),
            BackoffError::Rejected(source) => Some(source),
            BackoffError::InvalidAttempt(_) => None,
        }
    }
}

/// Computes the pause before the next attempt, or `None` once `attempt` has reached
/// `max_retries`.
pub fn exponential_strategy(
    attempt: i64,
    max_retries: u32,
    time_factor: Duration,
) -> Result<Option<Duration>, InvalidAttempt> {
    let jitter = rand::rng().random::<f64>();
    exponential_strategy_with_jitter(attempt, max_retries, time_factor, jitter)
}

/// Same as [`exponential_strategy`] with a caller-supplied jitter in `[0, 1)`.
pub fn exponential_strategy_with_jitter(
    attempt: i64,
    max_retries: u32,
    time_factor: Duration,
    jitter: f64,
) -> Result<Option<Duration>, InvalidAttempt> {
    if attempt < 0 {
        return Err(InvalidAttempt(attempt));
    }
    if attempt >= i64::from(max_retries) {
        return Ok(None);
    }
    let exponent = attempt.min(i64::from(MAX_EXPONENT)) as i32;
    let units = 2f64.powi(exponent) + jitter;
    let delay = Duration::try_from_secs_f64(time_factor.as_secs_f64() * units)
        .unwrap_or(Duration::MAX);
    Ok(Some(delay))
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(u32, Duration, &E) + Send + Sync>;

/// Exponential backoff executor for connection attempts.
pub struct Backoff<E> {
    config: BackoffConfig,
    retry_if: Option<RetryPredicate<E>>,
    on_retry: Option<RetryHook<E>>,
}

impl<E> Clone for Backoff<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            retry_if: self.retry_if.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> std::fmt::Debug for Backoff<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("config", &self.config)
            .field("retry_if", &self.retry_if.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E: Display> Backoff<E> {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retry_if: None,
            on_retry: None,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Only retry errors for which `predicate` returns true; anything else is returned
    /// immediately as [`BackoffError::Rejected`].
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Called with `(attempt, delay, error)` before each pause.
    pub fn on_retry(mut self, hook: impl Fn(u32, Duration, &E) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Run `operation` until it succeeds or retries are exhausted.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, BackoffError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(attempt, "Connection attempt succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if let Some(predicate) = &self.retry_if {
                if !predicate(&err) {
                    tracing::debug!(attempt, error = %err, "Error is not retryable");
                    return Err(BackoffError::Rejected(err));
                }
            }

            let delay = match exponential_strategy(
                i64::from(attempt),
                self.config.max_retries,
                self.config.time_factor,
            )? {
                Some(delay) => delay,
                None => {
                    return Err(BackoffError::Exhausted {
                        attempts: attempt + 1,
                        source: err,
                    })
                }
            };

            tracing::warn!(
                attempt,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Connection attempt failed, retrying"
            );
            if let Some(hook) = &self.on_retry {
                hook(attempt, delay, &err);
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
