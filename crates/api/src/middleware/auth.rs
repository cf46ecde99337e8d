//! Session authentication middleware
//!
//! Extracts the session token from the auth cookie first, then from an
//! `Authorization: Bearer` header. Downstream handlers only ever see the
//! decoded [`AuthUser`].

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use nightwatch_core::models::Role;
use nightwatch_core::security::decode_session_token;
use nightwatch_core::types::UserId;

use crate::AppState;
use crate::config::SESSION_COOKIE;
use crate::error::ApiError;

/// Authenticated caller, attached to request extensions
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: UserId,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

/// Require a valid session token (cookie or bearer)
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| bearer_token(request.headers()));

    let Some(token) = token else {
        return Err(ApiError::Unauthorized);
    };

    let claims = decode_session_token(&state.config.jwt_secret, &token)
        .map_err(|_| ApiError::Unauthorized)?;

    request.extensions_mut().insert(AuthUser {
        id: claims.user_id(),
        role: claims.role,
    });

    Ok(next.run(request).await)
}

/// Require the admin role; must run after [`require_auth`]
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let Some(user) = request.extensions().get::<AuthUser>() else {
        return Err(ApiError::Unauthorized);
    };

    match user.role {
        Role::Admin => Ok(next.run(request).await),
        Role::Owl | Role::Guest => Err(ApiError::Forbidden),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}
