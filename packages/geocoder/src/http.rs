//! HTTP retry helper for provider lookups.
//!
//! Both provider clients fetch JSON through [`get_json`] instead of
//! calling `reqwest::RequestBuilder::send()` directly, so every lookup
//! gets bounded retries with exponential backoff for transient failures
//! (timeouts, connection resets, HTTP 429, HTTP 5xx).

use std::time::Duration;

use crate::GeocodeError;

/// Sends a GET request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`], since builders are consumed by
/// `.send()`.
///
/// Retries up to `max_retries` times with exponential backoff on
/// transport errors, timeouts, HTTP 429, and HTTP 5xx. Other non-2xx
/// statuses are permanent and returned immediately.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the request fails after all retries, the
/// server returns a non-retryable status, or the body is not valid JSON.
#[allow(clippy::future_not_send)]
pub async fn get_json<F>(
    build_request: F,
    max_retries: u32,
) -> Result<serde_json::Value, GeocodeError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, max_retries).await?;
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Core retry loop: sends the request, retrying transient failures.
/// Returns the successful [`reqwest::Response`] (status 2xx or 3xx).
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, GeocodeError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error: Option<GeocodeError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << attempt); // 2s, 4s, 8s
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    last_error = Some(GeocodeError::Http(e));
                    continue;
                }
                return Err(GeocodeError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                // 429 and 5xx are worth retrying; other non-success
                // statuses are permanent.
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
                {
                    if attempt < max_retries {
                        log::warn!("  HTTP {status}, retrying");
                        last_error = Some(GeocodeError::BadStatus { status });
                        continue;
                    }
                    return Err(GeocodeError::BadStatus { status });
                }

                if status.is_client_error() {
                    return Err(GeocodeError::BadStatus { status });
                }

                return Ok(response);
            }
        }
    }

    Err(last_error.unwrap_or(GeocodeError::BadStatus {
        status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
    }))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}
