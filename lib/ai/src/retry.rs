//! Retry policy for opening completion streams.
//!
//! Only the request that opens a stream is retried. Once text has been shown
//! to the user a retry would duplicate it, so mid-stream failures end the
//! turn instead.

use crate::error::LlmError;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Factor applied to the delay after each retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Returns the delay before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }

    /// Returns the delay for `error`, honouring a provider's retry-after hint.
    fn delay_for(&self, attempt: u32, error: &LlmError) -> Duration {
        match error {
            LlmError::RateLimited {
                retry_after_secs: Some(secs),
            } => Duration::from_secs(*secs).min(Duration::from_millis(self.max_delay_ms)),
            _ => self.delay_for_attempt(attempt),
        }
    }

    /// Runs `operation`, retrying retryable failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable error.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, Report<LlmError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Report<LlmError>>>,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.max_retries || !err.current_context().is_retryable() {
                return Err(err);
            }

            let delay = self.delay_for(attempt, err.current_context());
            warn!(
                operation = operation_name,
                attempt = attempt + 1,
                max = self.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "retrying after error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
