//! Client metadata capture
//!
//! Records the caller's IP (X-Forwarded-For aware) and user agent so that
//! audit writes and rate limiting see the same values everywhere.

use axum::{
    extract::{ConnectInfo, Request},
    http::header,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// Source address and user agent of the current request
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub ip: String,
    pub user_agent: String,
}

/// Attach [`ClientMeta`] to every request
pub async fn capture_client_meta(mut request: Request, next: Next) -> Response {
    let forwarded_for = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    let ip = forwarded_for.unwrap_or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    });

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    request.extensions_mut().insert(ClientMeta { ip, user_agent });
    next.run(request).await
}
