//! Admin broadcast management

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use nightwatch_core::models::{Audience, Broadcast};
use nightwatch_core::types::BroadcastId;

use crate::AppState;
use crate::db::audit::AuditContext;
use crate::db::broadcasts;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::middleware::client_meta::ClientMeta;

#[derive(Debug, Deserialize)]
pub struct CreateBroadcastRequest {
    pub message: String,
    pub audience: Audience,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListBroadcastsQuery {
    pub limit: Option<i64>,
}

async fn create_broadcast(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<CreateBroadcastRequest>,
) -> Result<Response, ApiError> {
    let ctx = AuditContext {
        actor: Some(auth.id),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    };
    let broadcast = broadcasts::create_broadcast(
        &state.pool,
        auth.id,
        &req.message,
        req.audience,
        req.scheduled_for,
        &ctx,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(broadcast)).into_response())
}

async fn list_broadcasts(
    State(state): State<AppState>,
    Query(query): Query<ListBroadcastsQuery>,
) -> Result<Json<Vec<Broadcast>>, ApiError> {
    let broadcasts = broadcasts::list_broadcasts(&state.pool, query.limit.unwrap_or(100)).await?;
    Ok(Json(broadcasts))
}

async fn get_broadcast(
    State(state): State<AppState>,
    Path(id): Path<BroadcastId>,
) -> Result<Json<Broadcast>, ApiError> {
    Ok(Json(broadcasts::get_broadcast(&state.pool, id).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/broadcasts", get(list_broadcasts).post(create_broadcast))
        .route("/broadcasts/{id}", get(get_broadcast))
}
