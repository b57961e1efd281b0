#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod auth;
pub mod error;
pub mod gcal_instance;
pub mod types;

use log::error;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::error::GcalError;

const MAX_RETRIES: usize = 5;

/// Retry a fallible request with exponential backoff. Permanent failures
/// (resync-required, not-found, bad request) are returned immediately.
pub async fn exponential_retry<T, U, F>(closure: T) -> Result<U, GcalError>
where
    T: Fn() -> F,
    F: Future<Output = Result<U, GcalError>>,
{
    let mut backoff = Duration::from_millis(500);
    for _ in 0..MAX_RETRIES {
        match closure().await {
            Err(e) if e.is_retryable() => {
                error!("got error {e}, retrying");
                sleep(backoff).await;
                backoff *= 2;
            }
            result => return result,
        }
    }
    closure().await
}

#[cfg(test)]
mod tests {
    use crate::{error::GcalError, exponential_retry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_exponential_retry_permanent_failure() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = exponential_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GcalError::ResyncRequired)
        })
        .await;
        assert!(matches!(result, Err(GcalError::ResyncRequired)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exponential_retry_success() {
        let result = exponential_retry(|| async { Ok(42) }).await.unwrap();
        assert_eq!(result, 42);
    }
}
