//! Retry-wrapped call execution

use std::future::Future;
use std::time::Duration;

use tonic::{Code, Status};
use tracing::warn;

/// Fixed delay between retries of an unreachable server. Constant
/// rather than exponential: this is a short-lived client library, not a
/// server shedding load.
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Invoke `call`, retrying when the failure is a transport-level
/// `Unavailable` status, up to `max_retries` times with a fixed `delay`
/// between attempts (total attempts = 1 + max_retries). Any other
/// status is surfaced on the first attempt, unchanged so the caller can
/// inspect its code. Service-level rejections ride in response bodies
/// and never reach this path.
pub(crate) async fn with_retry<T, F, Fut>(
    max_retries: u32,
    delay: Duration,
    mut call: F,
) -> std::result::Result<T, Status>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, Status>>,
{
    let mut retries = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(status) if status.code() == Code::Unavailable && retries < max_retries => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries, "lock service unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(status) => return Err(status),
        }
    }
}
