//! Per-call deadlines for remote operations.

use nst_core::{NstResult, StorageError};
use std::future::Future;
use std::time::Duration;

/// Run `call`, failing with `StorageError::Timeout` once `deadline` elapses.
pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, call: F) -> NstResult<T>
where
    F: Future<Output = NstResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            operation: operation.to_string(),
            after: deadline,
        }
        .into()),
    }
}
