// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with linear backoff and per-attempt timeouts.
//!
//! Every network call the engine makes is bounded twice: each attempt has a
//! timeout, and the number of attempts is capped. The delay after attempt N
//! is `N * step`, capped at `max_delay`.
//!
//! # Example
//!
//! ```
//! use capture_sync::{RetryConfig, UploadEngineConfig};
//! use std::time::Duration;
//!
//! let config = UploadEngineConfig::default();
//!
//! // Binary upload: 3 attempts, 180s each, 1s then 2s between attempts
//! let upload = RetryConfig::binary_upload(&config);
//! assert_eq!(upload.max_attempts, 3);
//! assert_eq!(upload.attempt_timeout, Some(Duration::from_secs(180)));
//! assert_eq!(upload.delay_after(2), Duration::from_secs(2));
//!
//! // Startup: fail fast on bad storage config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::UploadEngineConfig;

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail for initial storage connections
/// - [`RetryConfig::record_creation()`] - Phase 1 metadata call
/// - [`RetryConfig::binary_upload()`] - Phase 2 presigned PUT
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub step: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Option<Duration>,
}

impl RetryConfig {
    /// Fast-fail retry for opening local storage.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            step: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            attempt_timeout: None,
        }
    }

    /// Record creation: short timeout, capped attempts.
    #[must_use]
    pub fn record_creation(config: &UploadEngineConfig) -> Self {
        Self {
            max_attempts: config.record_max_attempts.max(1),
            step: Duration::from_millis(config.retry_step_ms),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Some(Duration::from_millis(config.record_timeout_ms)),
        }
    }

    /// Binary upload: long timeout, capped attempts.
    #[must_use]
    pub fn binary_upload(config: &UploadEngineConfig) -> Self {
        Self {
            max_attempts: config.upload_max_attempts.max(1),
            step: Duration::from_millis(config.retry_step_ms),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Some(Duration::from_millis(config.upload_timeout_ms)),
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            attempt_timeout: Some(Duration::from_millis(50)),
        }
    }

    /// Delay before the next attempt, after `attempt` attempts have failed.
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.step
            .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
            .min(self.max_delay)
    }
}

/// Errors that know whether another attempt can help.
pub trait Retryable: std::fmt::Display {
    /// `false` stops the retry loop immediately.
    fn is_retryable(&self) -> bool {
        true
    }

    /// Build the error reported when an attempt exceeds its timeout.
    fn timed_out(operation: &str, after: Duration) -> Self;
}

/// Why a retried operation gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::fmt::Display> {
    /// The continue-check failed before an attempt could be issued
    #[error("'{operation}' aborted after {attempts} attempt(s)")]
    Aborted { operation: String, attempts: usize },

    /// Every attempt failed with a retryable error
    #[error("'{operation}' failed after {attempts} attempt(s): {last}")]
    Exhausted {
        operation: String,
        attempts: usize,
        last: E,
    },

    /// An attempt failed with a non-retryable error
    #[error("'{operation}' failed: {error}")]
    Fatal { operation: String, error: E },
}

/// Retry `operation` until it succeeds or the attempt cap is reached.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    retry_while(operation_name, config, || true, operation).await
}

/// Like [`retry`], but `should_continue` is consulted before every attempt;
/// returning `false` aborts without issuing the call.
pub async fn retry_while<C, F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut should_continue: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    C: FnMut() -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        if !should_continue() {
            return Err(RetryError::Aborted {
                operation: operation_name.to_string(),
                attempts,
            });
        }

        let outcome = match config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => {
                    crate::metrics::record_timeout(operation_name);
                    Err(E::timed_out(operation_name, limit))
                }
            },
            None => operation().await,
        };
        attempts += 1;

        let err = match outcome {
            Ok(val) => {
                if attempts > 1 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts - 1);
                }
                return Ok(val);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(RetryError::Fatal {
                operation: operation_name.to_string(),
                error: err,
            });
        }

        if attempts >= max_attempts {
            return Err(RetryError::Exhausted {
                operation: operation_name.to_string(),
                attempts,
                last: err,
            });
        }

        let delay = config.delay_after(attempts);
        warn!(
            "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
            operation_name, attempts, max_attempts, err, delay
        );
        crate::metrics::record_retry(operation_name);
        sleep(delay).await;
    }
}
