//! Shared HTTP plumbing: client construction, status mapping, JSON helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;

use devbridge_sync::PlatformError;

use crate::error::ClientError;

pub(crate) const USER_AGENT: &str = concat!("devbridge/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Read a token from `var`. Whitespace-only counts as missing.
pub fn read_token(var: &str) -> Result<String, ClientError> {
    let raw = std::env::var(var).unwrap_or_default();
    let token = raw.trim();
    if token.is_empty() {
        return Err(ClientError::MissingToken {
            var: var.to_string(),
        });
    }
    Ok(token.to_string())
}

pub(crate) fn check_url(url: &str) -> Result<String, ClientError> {
    let trimmed = url.trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ClientError::InvalidUrl {
            url: url.to_string(),
            reason: "expected an http:// or https:// URL".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Send `request` and decode a JSON body.
pub(crate) async fn send_json(request: RequestBuilder, write: bool) -> Result<Value, PlatformError> {
    let response = send(request, write).await?;
    response
        .json::<Value>()
        .await
        .map_err(|e| PlatformError::InvalidResponse(e.to_string()))
}

/// Send `request`, mapping failures and non-2xx statuses.
pub(crate) async fn send(request: RequestBuilder, write: bool) -> Result<Response, PlatformError> {
    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!("HTTP {status}: {body}");
    Err(map_status(status, &headers, &body, write))
}

pub(crate) fn transport(err: reqwest::Error) -> PlatformError {
    if err.is_timeout() {
        PlatformError::Transport("request timed out".to_string())
    } else if err.is_decode() {
        PlatformError::InvalidResponse(err.to_string())
    } else {
        PlatformError::Transport(err.to_string())
    }
}

/// Map a non-success status onto the platform error taxonomy.
///
/// 409, 412 and 422 are write conflicts only on writes; on reads they are
/// unexpected responses.
pub(crate) fn map_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    write: bool,
) -> PlatformError {
    let message = error_message(body).unwrap_or_else(|| status.to_string());
    match status.as_u16() {
        404 => PlatformError::NotFound,
        401 => PlatformError::Auth(message),
        429 => PlatformError::RateLimited {
            retry_after: retry_after(headers),
        },
        403 if header_str(headers, "x-ratelimit-remaining") == Some("0") => {
            PlatformError::RateLimited {
                retry_after: retry_after(headers),
            }
        }
        403 => PlatformError::Auth(message),
        409 | 412 | 422 if write => PlatformError::WriteConflict(message),
        500..=599 => PlatformError::Transport(format!("{status}: {message}")),
        _ => PlatformError::InvalidResponse(format!("{status}: {message}")),
    }
}

/// `retry-after` seconds, else the `x-ratelimit-reset` epoch distance.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(secs));
    }
    let reset = header_str(headers, "x-ratelimit-reset")?
        .trim()
        .parse::<i64>()
        .ok()?;
    let wait = reset - Utc::now().timestamp();
    Some(Duration::from_secs(wait.max(0) as u64))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// GitHub uses `message`; Azure DevOps uses `message` too, wrapped or not.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// `items[].key` as a JSON array of strings; missing or null yields `[]`.
pub(crate) fn pluck(items: Option<&Value>, key: &str) -> Value {
    let names = items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(key).and_then(Value::as_str))
                .map(|s| Value::String(s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    Value::Array(names)
}

/// Follow a `/`-separated pointer and clone, or `null`.
pub(crate) fn at(value: &Value, pointer: &str) -> Value {
    value.pointer(pointer).cloned().unwrap_or(Value::Null)
}

pub(crate) fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Canonical string arrays as `Vec<String>`, ignoring non-strings.
pub(crate) fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// A non-null canonical field, for building partial write bodies.
pub(crate) fn present<'a>(snapshot: &'a devbridge_core::Snapshot, field: &str) -> Option<&'a Value> {
    snapshot.get(field).filter(|v| !v.is_null())
}
