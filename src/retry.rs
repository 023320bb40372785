//! `with_retry` — a thin wrapper over a fallible async operation that
//! retries retryable errors up to `max_retries` additional times, honoring
//! each error's suggested delay.

use crate::error::CoreError;

pub async fn with_retry<F, Fut, T>(max_retries: u32, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                if let Some(delay) = e.suggested_retry_delay() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
