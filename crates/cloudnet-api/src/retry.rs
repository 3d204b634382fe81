//! Retry logic for transient HTTP failures.

use std::time::Duration;

use cloudnet_common::{CloudnetError, CloudnetResult};
use reqwest::{RequestBuilder, Response};
use tracing::warn;

/// Maximum number of attempts per request.
const MAX_ATTEMPTS: u32 = 5;
/// Initial retry delay (doubles each retry).
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Maximum retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Send a request, retrying server errors and transport failures with
/// exponential backoff. Client errors (4xx) surface immediately.
///
/// Requests with streaming bodies cannot be cloned and are sent exactly once.
pub async fn send_with_retry(request: RequestBuilder) -> CloudnetResult<Response> {
    let Some(mut current) = request.try_clone() else {
        return check_status(request.send().await.map_err(into_http_error)?).await;
    };

    let mut delay = INITIAL_RETRY_DELAY;
    for attempt in 1..=MAX_ATTEMPTS {
        let next = request.try_clone().expect("cloneable request");
        match current.send().await {
            Ok(response) if response.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                warn!(
                    status = response.status().as_u16(),
                    attempt, "Server error, retrying"
                );
            }
            Ok(response) => return check_status(response).await,
            Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                warn!(error = %err, attempt, "Transient HTTP failure, retrying");
            }
            Err(err) => return Err(into_http_error(err)),
        }
        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, MAX_RETRY_DELAY);
        current = next;
    }
    unreachable!("retry loop returns on the last attempt")
}

/// Map an error-status response to a `CloudnetError::Http`.
pub async fn check_status(response: Response) -> CloudnetResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message: String = body.trim().chars().take(500).collect();
    Err(CloudnetError::Http {
        status: Some(status.as_u16()),
        message,
    })
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn into_http_error(err: reqwest::Error) -> CloudnetError {
    CloudnetError::Http {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}
