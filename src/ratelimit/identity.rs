//! Identifier extraction and hashing for rate-limit keys.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, header};
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr};

/// Bucket used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// One-way hash used in counter keys; identifiers never reach the backend
/// or the logs in clear text.
pub fn hash_identifier(identifier: &str) -> String {
    hex::encode(Sha256::digest(identifier.as_bytes()))
}

/// Extracts the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively; any other shape yields `None`.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Resolves the client address.
///
/// With `trust_forwarded` the first `X-Forwarded-For` hop wins, then
/// `X-Real-IP`. The socket peer address is used otherwise, and as the
/// fallback. Forwarded headers are client-controlled unless a proxy
/// overwrites them.
pub fn client_ip<B>(request: &Request<B>, trust_forwarded: bool) -> Option<String> {
    if trust_forwarded {
        if let Some(ip) = forwarded_ip(request.headers()) {
            return Some(ip);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    real_ip.map(str::to_string)
}

/// True for loopback, private, link-local and unique-local addresses.
/// Unparseable input is treated as public.
pub fn is_private_ip(raw: &str) -> bool {
    let Ok(ip) = raw.trim().parse::<IpAddr>() else {
        return false;
    };
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return mapped.is_loopback() || mapped.is_private() || mapped.is_link_local();
            }
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
