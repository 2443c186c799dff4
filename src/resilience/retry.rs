// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic for transient failures.
//!
//! # Example
//!
//! ```
//! use cdc_sync_engine::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: wait for the source forever, at a fixed pace
//! let source = RetryConfig::source_reconnect(Duration::from_secs(10));
//! assert_eq!(source.max_retries, None);
//! assert_eq!(source.factor, 1.0);
//!
//! // Pool acquire: quick retry, then fail the cycle
//! let acquire = RetryConfig::acquire();
//! assert_eq!(acquire.max_retries, Some(3));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection/operation retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl RetryConfig {
    /// Unbounded retry at a fixed delay.
    /// The engine cannot make progress without the source, so startup waits
    /// for it indefinitely.
    #[must_use]
    pub fn source_reconnect(delay: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
        }
    }

    /// Quick retry for acquiring a pooled target connection.
    /// 3 attempts with fast backoff - if it fails, the cycle fails.
    #[must_use]
    pub fn acquire() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Retry `operation` on every error.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(operation_name, config, operation, |_| true).await
}

/// Retry `operation` while `should_retry` accepts the error; other errors
/// are returned immediately.
pub async fn retry_when<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }

                attempts += 1;

                match config.max_retries {
                    Some(max) if attempts >= max => return Err(err),
                    Some(max) => warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempts, max, err, delay
                    ),
                    None => warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, attempts, err, delay
                    ),
                }

                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}
