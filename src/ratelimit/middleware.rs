//! axum middleware applying a [`RateLimiter`] to requests.
//!
//! Every counted request gets `X-RateLimit-Limit`, `X-RateLimit-Remaining`
//! and `X-RateLimit-Reset`; rejected requests additionally get `Retry-After`
//! and a 429 with `{"error": "..."}`.

use super::identity::{UNKNOWN_CLIENT, client_ip, extract_bearer_token, is_private_ip};
use super::{RateLimitDecision, RateLimiter};
use crate::web::ErrorResponse;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::warn;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Quota per client network address.
pub async fn limit_by_ip(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.is_active() {
        return next.run(request).await;
    }

    let ip = client_ip(&request, limiter.config().trust_forwarded_headers)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    if limiter.config().skip_private_ips && is_private_ip(&ip) {
        return next.run(request).await;
    }

    enforce(&limiter, &ip, request, next).await
}

/// Quota per bearer token; requests without a token are not counted.
pub async fn limit_by_token(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.is_active() {
        return next.run(request).await;
    }

    let Some(token) = extract_bearer_token(request.headers()) else {
        return next.run(request).await;
    };

    enforce(&limiter, &token, request, next).await
}

async fn enforce(limiter: &RateLimiter, identifier: &str, request: Request, next: Next) -> Response {
    let Some(decision) = limiter.evaluate(identifier).await else {
        return next.run(request).await;
    };

    if decision.allowed() {
        let mut response = next.run(request).await;
        // Headers set by an inner limiter win.
        if !response.headers().contains_key(X_RATELIMIT_LIMIT) {
            apply_headers(response.headers_mut(), &decision);
        }
        return response;
    }

    warn!(
        scope = %limiter.scope(),
        key = %limiter.key_for(identifier),
        attempts = decision.current,
        "rate limit exceeded"
    );
    rejection(limiter, &decision)
}

/// Writes the quota headers for `decision`.
pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining()));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at()));
}

fn rejection(limiter: &RateLimiter, decision: &RateLimitDecision) -> Response {
    let body = Json(ErrorResponse::new(limiter.scope().rejection_message()));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    let headers = response.headers_mut();
    apply_headers(headers, decision);
    headers.insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after_secs()),
    );
    response
}
