//! Retry of postings that lost a lock race

use std::future::Future;
use std::time::Duration;

use crate::config::LedgerConfig;
use crate::error::AppResult;

/// How often and how patiently to retry `Busy` errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

impl From<&LedgerConfig> for RetryPolicy {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            retries: config.busy_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Run `op`, retrying with exponential backoff while it fails with `Busy`.
/// Every other error is returned on first sight.
pub async fn retry_busy<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < policy.retries => {
                let delay = policy.backoff * 2u32.saturating_pow(attempt);
                tracing::warn!(attempt = attempt + 1, ?delay, error = %err, "Retrying busy posting");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_busy_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_busy(&policy(3), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::Busy("lock timeout".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: AppResult<()> = retry_busy(&policy(2), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Busy("lock timeout".into()))
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: AppResult<()> = retry_busy(&policy(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::DuplicatePosting("sale".into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::DuplicatePosting(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
