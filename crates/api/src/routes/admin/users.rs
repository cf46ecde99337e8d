//! Admin user management

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::json;

use nightwatch_core::models::{Role, User};
use nightwatch_core::types::{BookingId, UserId};
use nightwatch_core::validation::{MAX_NAME_LENGTH, validate_length, validate_phone};

use crate::AppState;
use crate::db::audit::{AuditContext, NewAuditEvent};
use crate::db::{audit, bookings, users};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::middleware::client_meta::ClientMeta;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub phone: String,
    pub name: String,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub phone: Option<String>,
    pub name: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub user_id: UserId,
}

fn audit_ctx(auth: &AuthUser, meta: &ClientMeta) -> AuditContext {
    AuditContext {
        actor: Some(auth.id),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    }
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = users::list_users(&state.pool, query.search.as_deref()).await?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(users::get_user(&state.pool, id).await?))
}

async fn create_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Response, ApiError> {
    validate_phone(&req.phone).map_err(|msg| ApiError::field("phone", "invalid_phone", msg))?;
    validate_length("name", &req.name, MAX_NAME_LENGTH)
        .map_err(|msg| ApiError::field("name", "too_long", msg))?;

    let user = users::create_user(
        &state.pool,
        &req.phone,
        &req.name,
        req.role.unwrap_or(Role::Owl),
    )
    .await?;

    audit::record(
        &state.pool,
        &audit_ctx(&auth, &meta),
        NewAuditEvent::new("user.created", "user", "create")
            .entity_id(user.id)
            .target(user.id)
            .details(json!({"role": user.role})),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(user)).into_response())
}

async fn update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<UserId>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    if let Some(phone) = req.phone.as_deref() {
        validate_phone(phone).map_err(|msg| ApiError::field("phone", "invalid_phone", msg))?;
    }

    let before = users::get_user(&state.pool, id).await?;
    let user = users::update_user(
        &state.pool,
        id,
        req.name.as_deref(),
        req.phone.as_deref(),
        req.role,
    )
    .await?;

    audit::record(
        &state.pool,
        &audit_ctx(&auth, &meta),
        NewAuditEvent::new("user.updated", "user", "update")
            .entity_id(id)
            .target(id)
            .details(json!({
                "before": {"name": before.name, "phone": before.phone, "role": before.role},
                "after": {"name": user.name, "phone": user.phone, "role": user.role},
            })),
    )
    .await?;

    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<UserId>,
) -> Result<StatusCode, ApiError> {
    users::delete_user(&state.pool, id).await?;

    audit::record(
        &state.pool,
        &audit_ctx(&auth, &meta),
        NewAuditEvent::new("user.deleted", "user", "delete").entity_id(id).target(id),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<StatusCode, ApiError> {
    let deleted = users::bulk_delete(&state.pool, &req.ids).await?;

    audit::record(
        &state.pool,
        &audit_ctx(&auth, &meta),
        NewAuditEvent::new("user.bulk_deleted", "user", "delete")
            .details(json!({"requested": req.ids.len(), "deleted": deleted})),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn reassign_booking(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<BookingId>,
    Json(req): Json<ReassignRequest>,
) -> Result<Json<nightwatch_core::models::Booking>, ApiError> {
    let booking =
        bookings::admin_reassign(&state.pool, id, req.user_id, &audit_ctx(&auth, &meta)).await?;
    Ok(Json(booking))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user).delete(bulk_delete))
        .route(
            "/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/bookings/{id}", put(reassign_booking))
}
