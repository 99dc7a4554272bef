//! Per-statement deadlines and cancellation

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bound one database operation by `timeout`.
///
/// The deadline covers only `fut`; callers wrap each statement separately.
pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::Timeout(timeout)),
    }
}

/// Abandon `fut` as soon as `token` is cancelled
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DbError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let err = with_deadline(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_deadline_passes_inner_result() {
        let value = with_deadline(Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_token_wins() {
        let token = CancellationToken::new();
        token.cancel();
        let err = cancellable(&token, std::future::pending::<DbResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Cancelled));
    }
}
