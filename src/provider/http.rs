//! Shared HTTP client, SSE parsing, and status mapping.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::TychoError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Parse an SSE "data:" line, returning None for "[DONE]".
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Map a non-200 HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> TychoError {
    match status {
        401 | 403 => TychoError::Authentication(body.to_string()),
        429 => TychoError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => TychoError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_data_strips_prefix() {
        assert_eq!(parse_sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
    }

    #[test]
    fn parse_sse_data_swallows_done() {
        assert_eq!(parse_sse_data("data: [DONE]"), None);
    }

    #[test]
    fn parse_sse_data_rejects_other_lines() {
        assert_eq!(parse_sse_data(": keepalive"), None);
        assert_eq!(parse_sse_data("event: ping"), None);
    }

    #[test]
    fn status_401_maps_to_authentication() {
        assert!(matches!(
            status_to_error(401, "no"),
            TychoError::Authentication(_)
        ));
    }

    #[test]
    fn status_429_extracts_retry_after() {
        let err = status_to_error(429, r#"{"error":{"retry_after":1.5}}"#);
        match err {
            TychoError::RateLimited { retry_after_ms } => {
                assert_eq!(retry_after_ms, Some(1500));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
