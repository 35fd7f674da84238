//! API-key authentication.
//!
//! Accepted credential carriers, in priority order:
//! 1. `Authorization: Bearer <key>`
//! 2. `Authorization: <key>` (raw key)
//! 3. `OpenAI-Api-Key: <key>`
//! 4. `?api_key=<key>` query parameter (browser WebSocket clients cannot
//!    set headers)
//!
//! An empty configured key list disables authentication entirely.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::ClientIp;
use crate::state::AppState;

fn extract_api_key(request: &Request<Body>) -> Option<String> {
    if let Some(auth_header) = request.headers().get("authorization") {
        let value = auth_header.to_str().ok()?;
        return Some(
            value
                .strip_prefix("Bearer ")
                .unwrap_or(value)
                .to_string(),
        );
    }

    if let Some(header) = request.headers().get("openai-api-key") {
        return header.to_str().ok().map(str::to_string);
    }

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "api_key" {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// Validates the request's API key against the configured list. Runs
/// after the connection limiter, so a rejected request must release the
/// slot the limiter claimed.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.config.auth.api_keys.is_empty() {
        return next.run(request).await;
    }

    let api_key = extract_api_key(&request).unwrap_or_default();
    if state.config.is_api_key_valid(&api_key) {
        return next.run(request).await;
    }

    if let Some(ClientIp(ip)) = request.extensions().get::<ClientIp>() {
        state.limiter.remove_connection(*ip);
        warn!(ip = %ip, "invalid API key");
    }
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(header: Option<(&str, &str)>, uri: &str) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token() {
        let request = request_with(Some(("authorization", "Bearer sk-123")), "/v1/realtime");
        assert_eq!(extract_api_key(&request).as_deref(), Some("sk-123"));
    }

    #[test]
    fn test_raw_authorization_header() {
        let request = request_with(Some(("authorization", "sk-123")), "/v1/realtime");
        assert_eq!(extract_api_key(&request).as_deref(), Some("sk-123"));
    }

    #[test]
    fn test_openai_api_key_header() {
        let request = request_with(Some(("openai-api-key", "sk-456")), "/v1/realtime");
        assert_eq!(extract_api_key(&request).as_deref(), Some("sk-456"));
    }

    #[test]
    fn test_query_parameter() {
        let request = request_with(None, "/v1/realtime?api_key=sk-789&foo=bar");
        assert_eq!(extract_api_key(&request).as_deref(), Some("sk-789"));
    }

    #[test]
    fn test_no_credentials() {
        let request = request_with(None, "/v1/realtime");
        assert!(extract_api_key(&request).is_none());
    }

    #[test]
    fn test_header_takes_priority_over_query() {
        let request = request_with(
            Some(("authorization", "Bearer from-header")),
            "/v1/realtime?api_key=from-query",
        );
        assert_eq!(extract_api_key(&request).as_deref(), Some("from-header"));
    }
}
