//! API Middleware
//!
//! Request logging for the admin surface.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

/// Operator credentials and session headers never reach the logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Header pairs safe to log, sensitive values replaced
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                "[REDACTED]"
            } else {
                value.to_str().unwrap_or("[invalid utf8]")
            };
            (name.to_string(), value.to_string())
        })
        .collect()
}

/// Log every admin request with its request id, method and outcome
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    // Set by SetRequestIdLayer
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    tracing::debug!(
        method = %method,
        uri = %uri,
        request_id = ?request_id,
        headers = ?mask_headers_for_logging(request.headers()),
        "Admin request received"
    );

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status();

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = start.elapsed().as_millis() as u64,
            request_id = ?request_id,
            "Admin request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = start.elapsed().as_millis() as u64,
            request_id = ?request_id,
            "Admin request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer operator-token".parse().unwrap());
        headers.insert("cookie", "session=abc".parse().unwrap());
        headers.insert("x-request-id", "req-123".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);
        let value = |name: &str| {
            masked
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(value("authorization"), "[REDACTED]");
        assert_eq!(value("cookie"), "[REDACTED]");
        assert_eq!(value("content-type"), "application/json");
        assert_eq!(value("x-request-id"), "req-123");
    }

    #[test]
    fn test_only_credential_headers_are_sensitive() {
        assert_eq!(SENSITIVE_HEADERS, &["authorization", "cookie", "set-cookie"]);
    }
}
