//! Bounded retry with per-attempt timeout for provider calls.

use std::future::Future;

use crate::error::{ProviderError, ProviderResult};
use crate::types::RetryPolicy;

/// Run `call` under `policy`.
///
/// Each attempt is bounded by `policy.call_timeout`; expiry becomes
/// `ProviderError::Timeout`. Only retryable errors trigger another attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &'static str,
    mut call: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider,
                secs: policy.call_timeout.as_secs(),
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                attempt += 1;
                let backoff = policy.backoff_for(attempt);
                tracing::debug!(
                    provider,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "retrying provider call"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
