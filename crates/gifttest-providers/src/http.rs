//! HTTP plumbing shared by the provider adapters.

use std::time::Duration;

use gifttest_core::error::ProviderError;
use gifttest_core::traits::GenerateRequest;

pub(crate) const USER_AGENT: &str = concat!("gifttest/", env!("CARGO_PKG_VERSION"));

/// Used when a 429 carries no usable `retry-after` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Longest error body kept in an error message.
const ERROR_PREVIEW_CHARS: usize = 400;

pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("falling back to a default HTTP client: {e}");
            reqwest::Client::new()
        })
}

/// Map a transport failure to a provider error.
pub(crate) fn send_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout.as_secs())
    } else {
        ProviderError::NetworkError(err.to_string())
    }
}

/// Turn non-success statuses into provider errors; pass successful responses through.
pub(crate) async fn check_status(
    response: reqwest::Response,
    model: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if status < 400 {
        return Ok(response);
    }

    if status == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
            * 1000;
        return Err(ProviderError::RateLimited {
            retry_after_ms: retry_after,
        });
    }

    let body = preview(&response.text().await.unwrap_or_default());
    Err(match status {
        401 | 403 => ProviderError::AuthenticationFailed(body),
        404 => ProviderError::ModelNotFound(model.to_string()),
        _ => ProviderError::ApiError {
            status,
            message: body,
        },
    })
}

/// The request's API key, trimmed. Missing keys fail like a rejected key would.
pub(crate) fn require_key<'a>(
    request: &'a GenerateRequest,
    provider: &str,
) -> Result<&'a str, ProviderError> {
    request
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProviderError::AuthenticationFailed(format!("no API key for {provider}")))
}

pub(crate) fn invalid_body(err: impl std::fmt::Display) -> ProviderError {
    ProviderError::InvalidResponse(format!("failed to parse response: {err}"))
}

pub(crate) fn preview(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(ERROR_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

/// Remove trailing slashes so paths can be appended with `format!`.
pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
