//! Fixed-delay retry for gateway calls.
//!
//! [`retry_fixed`] retries transient failures (network errors, 5xx) up to a
//! fixed count with the same pause between attempts. Client errors (4xx)
//! are returned immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::GatewayError;

/// Returns `true` for errors that are worth retrying.
///
/// **Retriable:** timeouts, connection failures and HTTP 5xx.
///
/// **Not retriable:** any 4xx, missing credentials, bad amounts, malformed
/// responses and signature failures.
pub(crate) fn is_retriable(err: &GatewayError) -> bool {
    match err {
        GatewayError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        GatewayError::Status { status, .. } => (500..600).contains(status),
        GatewayError::MissingCredentials
        | GatewayError::InvalidBaseUrl { .. }
        | GatewayError::InvalidAmount(_)
        | GatewayError::Deserialize { .. }
        | GatewayError::InvalidSignature(_) => false,
    }
}

/// Runs `operation`, retrying transient failures up to `max_retries` more
/// times with `delay_ms` between attempts.
pub(crate) async fn retry_fixed<T, F, Fut>(
    max_retries: u32,
    delay_ms: u64,
    mut operation: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "gateway transient error, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}
