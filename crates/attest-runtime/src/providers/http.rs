//! Shared HTTP plumbing for the reqwest-based backends.

use reqwest::{header::HeaderMap, Response, StatusCode};
use std::time::Duration;

use super::ProviderError;
#[cfg(any(feature = "anthropic", feature = "openai"))]
use crate::document::DocumentPayload;

/// Build a client with the configured request timeout.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))
}

/// A request that could not be built locally. Never retried.
fn invalid_request(message: String) -> ProviderError {
    ProviderError::Api {
        status: StatusCode::BAD_REQUEST.as_u16(),
        message,
    }
}

/// Map a transport error.
pub(crate) fn transport_error(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if error.is_builder() {
        invalid_request(error.to_string())
    } else {
        ProviderError::Http(error.to_string())
    }
}

/// The document as a multipart `file` part.
#[cfg(any(feature = "anthropic", feature = "openai"))]
pub(crate) fn document_part(document: &DocumentPayload) -> Result<reqwest::multipart::Part, ProviderError> {
    reqwest::multipart::Part::bytes(document.bytes().to_vec())
        .file_name(document.name().to_string())
        .mime_str(document.mime_type())
        .map_err(|e| invalid_request(format!("media type {:?}: {}", document.mime_type(), e)))
}

/// Pass successful responses through; turn failures into [`ProviderError`].
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, retry_after, body))
}

pub(crate) fn classify(status: StatusCode, retry_after: Option<Duration>, body: String) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimited { retry_after },
        401 | 403 => ProviderError::Auth,
        code @ 500..=599 => ProviderError::Overloaded {
            status: code,
            message: body,
        },
        code => ProviderError::Api {
            status: code,
            message: body,
        },
    }
}

/// Parse a `retry-after` header given in whole or fractional seconds.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
}
