// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

pub mod retry;

pub use retry::{retry, retry_when, RetryConfig};

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::storage::traits::StorageError;

/// Bound `fut` by `limit`. `None` waits indefinitely.
pub async fn with_timeout<T, F>(operation: &str, limit: Option<Duration>, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    let Some(limit) = limit else {
        return fut.await;
    };

    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, after = ?limit, "Operation timed out");
            crate::metrics::record_timeout(operation);
            Err(StorageError::Timeout {
                operation: operation.to_string(),
                after: limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapses() {
        let result: Result<(), _> = with_timeout("slow_op", Some(Duration::from_secs(5)), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match result {
            Err(StorageError::Timeout { operation, after }) => {
                assert_eq!(operation, "slow_op");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_limit_waits() {
        let result = with_timeout("slow_op", None, async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<(), _> = with_timeout("op", Some(Duration::from_secs(1)), async {
            Err(StorageError::Query("bad".into()))
        })
        .await;
        assert!(matches!(result, Err(StorageError::Query(_))));
    }
}
