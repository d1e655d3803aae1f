//! HTTP send with bounded transport retries.

use std::time::Duration;

use reqwest::{header::HeaderValue, RequestBuilder, Response, StatusCode};

use crate::backend::BackendError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

pub fn retry_decision_for_status(status: StatusCode) -> RetryDecision {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

/// `Retry-After` (seconds, capped at 30) wins over the policy delay.
fn retry_delay(retry: u32, policy: &RetryPolicy, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(30));
    }
    policy.delay_for(retry)
}

/// Send `request`, retrying 429/408/5xx and connect/timeout failures per
/// `policy`. Non-success responses that are not retried become errors.
pub async fn send_with_retry(
    request: RequestBuilder,
    policy: &RetryPolicy,
) -> Result<Response, BackendError> {
    let attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        let Some(cloned) = request.try_clone() else {
            // Streaming bodies cannot be replayed.
            let response = request.send().await?;
            return check_status(response).await;
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if retry_decision_for_status(status) == RetryDecision::Retryable
                    && attempt < attempts
                {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "supabase retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return check_status(response).await;
            }
            Err(err) => {
                if (err.is_timeout() || err.is_connect()) && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "supabase retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(err.into());
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Map an error response to a `BackendError`, pulling the human message out
/// of the PostgREST / GoTrue / Storage error shapes.
pub fn status_error(status: StatusCode, body: &str) -> BackendError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::CONFLICT => BackendError::Conflict(message),
        _ => BackendError::Status {
            status: status.as_u16(),
            message,
        },
    }
}
