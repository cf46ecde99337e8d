//! Web push subscription endpoints

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};

use nightwatch_core::models::PushSubscription;

use crate::AppState;
use crate::db::push::{self, NewSubscription};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;

/// Subscribe request
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub p256dh_key: String,
    pub auth_key: String,
    pub user_agent: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VapidPublicResponse {
    pub public_key: Option<String>,
}

/// Register (or refresh) a push subscription
async fn subscribe(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Response, ApiError> {
    if req.endpoint.trim().is_empty() {
        return Err(ApiError::field("endpoint", "required", "endpoint must not be empty"));
    }

    let subscription: PushSubscription = push::upsert_subscription(
        &state.pool,
        auth.id,
        NewSubscription {
            endpoint: req.endpoint,
            p256dh: req.p256dh_key,
            auth: req.auth_key,
            user_agent: req.user_agent,
            platform: req.platform,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(subscription)).into_response())
}

/// Drop a subscription by endpoint
async fn unsubscribe(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(endpoint): Path<String>,
) -> Result<StatusCode, ApiError> {
    push::delete_subscription(&state.pool, auth.id, &endpoint).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// VAPID public key for client-side subscription
async fn vapid_public(State(state): State<AppState>) -> Json<VapidPublicResponse> {
    Json(VapidPublicResponse {
        public_key: state.config.vapid_public_key.clone(),
    })
}

/// Authenticated push routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/push/subscribe", post(subscribe))
        .route("/push/subscribe/{*endpoint}", delete(unsubscribe))
        .route("/push/vapid-public", get(vapid_public))
}
